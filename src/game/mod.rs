pub mod combat;
pub mod constants;
pub mod entity;
pub mod game_loop;
pub mod spatial;
pub mod world;
