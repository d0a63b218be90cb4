pub mod beam;
pub mod config;
pub mod engine;
pub mod fresnel;
pub mod geom;
pub mod interaction;
pub mod jones;
pub mod mueller;
pub mod powers;
pub mod protocol;
pub mod scene;
pub mod settings;
pub mod snell;
pub mod stokes;
pub mod surrogate;
pub mod sweep;
pub mod thin_film;
pub mod worker;
pub mod world;
