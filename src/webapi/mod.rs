pub mod seventv;
pub mod telegram;
