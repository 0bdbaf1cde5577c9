//! Sales domain module: carts, pricing and the checkout state machine.
//!
//! Pure, deterministic logic only. Collaborator calls, locking and persistence
//! are driven from the infrastructure layer.

pub mod cart;
pub mod checkout;
pub mod order;

pub use cart::{Cart, CartLine, ValidatedCart, ValidatedLine};
pub use checkout::{
    CheckoutRun, CheckoutStage, CheckoutState, CompensationLog, ReservedLine,
};
pub use order::{
    CatalogItem, NewOrder, OrderLine, OrderStatus, PricedCart, PricedLine, ShippingAddress,
    price_cart,
};
