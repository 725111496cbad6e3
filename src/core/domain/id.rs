//! Identifier newtypes.
//!
//! Every venue hands out opaque strings; the newtypes exist so the three
//! id spaces cannot mix at compile time. Construction goes through
//! `From<&str>`/`From<String>`, reading through `as_str`/`Display`.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// View as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

opaque_id!(
    /// An outcome token at one venue.
    TokenId
);

opaque_id!(
    /// A market at one venue. The same underlying event has distinct
    /// `MarketId`s per venue, linked through the mapping table.
    MarketId
);

opaque_id!(
    /// A venue-assigned order identifier. On-chain legs carry the
    /// transaction hash returned by the winning RPC endpoint.
    OrderId
);

impl MarketId {
    /// The outcome token this market id names.
    ///
    /// On the CLOB venue every outcome token has its own book and stream,
    /// so market ids and token ids share one namespace.
    #[must_use]
    pub fn to_token(&self) -> TokenId {
        TokenId(self.0.clone())
    }
}

impl OrderId {
    /// Generate a fresh random order id (paper trading).
    #[must_use]
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_str() {
        let token = TokenId::from("token-123");
        assert_eq!(token.as_str(), "token-123");
        assert_eq!(token.to_string(), "token-123");

        let market = MarketId::from(String::from("1.2345"));
        assert_eq!(market.as_str(), "1.2345");
    }

    #[test]
    fn ids_compare_by_value() {
        assert_eq!(MarketId::from("m1"), MarketId::from(String::from("m1")));
        assert_ne!(MarketId::from("m1"), MarketId::from("m2"));
    }

    #[test]
    fn clob_market_ids_name_their_token() {
        let market = MarketId::from("tok-yes");
        assert_eq!(market.to_token(), TokenId::from("tok-yes"));
    }

    #[test]
    fn random_order_ids_are_unique() {
        assert_ne!(OrderId::random(), OrderId::random());
    }
}
