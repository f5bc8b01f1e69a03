//! Inbound message routing
//!
//! Holds the subscription table and dispatches broker messages to the
//! callbacks registered for matching topic filters.

pub mod router;

pub use router::{
    CallbackError, InboundRouter, Subscription, SubscriptionCallback, SubscriptionTable,
};
