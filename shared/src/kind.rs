//! Message kind tags
//!
//! Every message carries a 4-byte kind tag in its header. Applications define
//! their own tag enum and implement [`MessageKind`] for it, usually through
//! the [`message_kind!`](crate::message_kind) macro.

use std::fmt::Debug;

/// A tag type that can travel in the 4-byte kind field of a header
pub trait MessageKind: Copy + PartialEq + Debug + Send + Sync + 'static {
    fn to_raw(self) -> u32;

    /// Maps a raw tag read off the wire back to a kind.
    ///
    /// Returns `None` for tags the application does not know; the read loop
    /// treats that as a corrupt stream.
    fn from_raw(raw: u32) -> Option<Self>;
}

impl MessageKind for u32 {
    fn to_raw(self) -> u32 {
        self
    }

    fn from_raw(raw: u32) -> Option<Self> {
        Some(raw)
    }
}

/// Declares a `#[repr(u32)]` enum and implements [`MessageKind`] for it
///
/// ```rust
/// shared::message_kind! {
///     pub enum ChatMsg {
///         Join = 0,
///         Say = 1,
///         Leave = 2,
///     }
/// }
///
/// use shared::MessageKind;
/// assert_eq!(ChatMsg::Say.to_raw(), 1);
/// assert_eq!(ChatMsg::from_raw(2), Some(ChatMsg::Leave));
/// assert_eq!(ChatMsg::from_raw(9), None);
/// ```
#[macro_export]
macro_rules! message_kind {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant = $value ),+
        }

        impl $crate::MessageKind for $name {
            fn to_raw(self) -> u32 {
                self as u32
            }

            fn from_raw(raw: u32) -> Option<Self> {
                $(
                    if raw == $name::$variant as u32 {
                        return Some($name::$variant);
                    }
                )+
                None
            }
        }
    };
}
