//! Outbound integrations with payment providers.

pub mod mercadopago;
