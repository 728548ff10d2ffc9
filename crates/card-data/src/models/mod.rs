//! Data models shared by the provider and the cache layers.

mod card;
mod price;

pub use card::{Card, CardFace, CardPrices, FaceImageUris, ImageUris, UNRANKED_EDHREC};
pub use price::{PriceData, PriceRange};
