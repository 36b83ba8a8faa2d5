pub mod control;
pub mod devices;
pub mod health;
pub mod sites;
pub mod transmitters;
pub mod traps;
