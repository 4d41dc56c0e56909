pub mod cart;
pub mod customer;
pub mod order;

pub use cart::{CartItemRequest, CartLine, ProductPayload};
pub use customer::{CustomerMetadata, CustomerMetadataPayload, ShippingAddress};
pub use order::{CheckoutAttemptState, Order, OrderStatus};
