mod key;
mod value;

pub use key::{AttributeGroup, AttributeKey, AttributeShape};
pub use value::{AttributeValue, Color};
