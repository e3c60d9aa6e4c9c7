//! Links - 共有リンクのレジストリ

pub mod registry;

pub use self::registry::{
    DEFAULT_MAX_REDEMPTIONS, IssuedLink, LinkError, LinkRegistry, ReapReport, Redemption,
};
