mod amount;
pub mod helpers;
mod secret;

pub use amount::{Amount, AmountError, AMOUNT_FRACTION_BASE, MAX_CURRENCY_LEN};
pub use secret::Secret;
