pub mod errors;

/// Hard ceiling on the delivered artifact size. Telegram rejects video
/// stickers above this.
pub const MAX_RESULT_SIZE: u64 = 256 << 10;
