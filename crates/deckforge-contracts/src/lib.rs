pub mod deck;
pub mod events;
pub mod styles;
pub mod summary;
pub mod wire;
