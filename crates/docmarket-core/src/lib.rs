// DocMarket Core - domain logic shared by the marketplace library and CLI

pub mod address;
pub mod blob;
pub mod cart;
pub mod chain;
pub mod error;
pub mod form;
pub mod hash;
pub mod price;

pub use address::{normalize_address, same_address, truncate_address};
pub use blob::{blob_object_path, content_type_for};
pub use cart::{Cart, CartItem};
pub use chain::{chain_matches, SEPOLIA_CHAIN_ID, SEPOLIA_CHAIN_ID_HEX};
pub use error::ValidationError;
pub use form::{BuyForm, UploadForm, ValidUpload, MAX_AMOUNT};
pub use hash::sha256_hex;
pub use price::{parse_price, total_price};
