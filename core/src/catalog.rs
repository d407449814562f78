//! Domain event names published by the storefront services
//!
//! Names follow `<entity>.<transition>`. The channel accepts any topic
//! string, so services may publish names outside this catalog; the enum
//! exists so the common ones are checked at compile time.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A topic string that is not part of the catalog
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event name '{0}'")]
pub struct UnknownEventName(pub String);

macro_rules! event_catalog {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Known domain events
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum EventName {
            $($variant,)+
        }

        impl EventName {
            /// Every cataloged event, grouped by entity
            pub const ALL: &'static [EventName] = &[$(EventName::$variant),+];

            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(EventName::$variant => $name,)+
                }
            }
        }

        impl FromStr for EventName {
            type Err = UnknownEventName;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(EventName::$variant),)+
                    other => Err(UnknownEventName(other.to_string())),
                }
            }
        }
    };
}

event_catalog! {
    UserRegistered => "user.registered",
    UserVerified => "user.verified",
    UserDeactivated => "user.deactivated",

    ProductCreated => "product.created",
    ProductUpdated => "product.updated",
    ProductDeleted => "product.deleted",
    ProductOutOfStock => "product.out_of_stock",

    OrderCreated => "order.created",
    OrderConfirmed => "order.confirmed",
    OrderShipped => "order.shipped",
    OrderDelivered => "order.delivered",
    OrderCancelled => "order.cancelled",

    PaymentInitiated => "payment.initiated",
    PaymentSucceeded => "payment.succeeded",
    PaymentFailed => "payment.failed",
    PaymentRefunded => "payment.refunded",

    CartItemAdded => "cart.item_added",
    CartItemRemoved => "cart.item_removed",
    CartCleared => "cart.cleared",
}

impl EventName {
    /// Entity prefix, e.g. `order` for `order.created`
    pub fn entity(&self) -> &'static str {
        let name = self.as_str();
        name.split_once('.').map(|(entity, _)| entity).unwrap_or(name)
    }
}

impl AsRef<str> for EventName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}
