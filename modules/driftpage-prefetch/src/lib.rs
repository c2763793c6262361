pub mod queue;
pub mod store;
pub mod token;
pub mod topup;

pub use queue::{clamp_batch, PrefetchQueue, Preview};
pub use store::SignatureStore;
pub use token::TokenSigner;
pub use topup::Prefetcher;
