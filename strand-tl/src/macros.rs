//! Declarative generators for schema types.
//!
//! Each constructor is written once, in TL field order, and the macros derive
//! the struct, its constructor ID and both directions of the wire encoding.

/// A bare constructor: struct + [`crate::Identifiable`] + boxed encode/decode.
///
/// The generated `Serializable` impl writes the constructor ID followed by the
/// fields; `Deserializable` expects (and checks) the same ID first.
macro_rules! tl_struct {
    (
        $(#[doc = $doc:literal])*
        #[tl(id = $id:literal, name = $tl_name:literal)]
        pub struct $name:ident {
            $( $(#[doc = $fdoc:literal])* pub $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[doc = $doc])*
        #[derive(Clone, Debug, PartialEq)]
        pub struct $name {
            $( $(#[doc = $fdoc])* pub $field: $ty, )*
        }

        impl $crate::Identifiable for $name {
            const CONSTRUCTOR_ID: u32 = $id;
            const NAME: &'static str = $tl_name;
        }

        impl $crate::Serializable for $name {
            #[allow(unused_variables)]
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                $crate::Serializable::serialize(
                    &<Self as $crate::Identifiable>::CONSTRUCTOR_ID,
                    buf,
                );
                $( $crate::Serializable::serialize(&self.$field, buf); )*
            }
        }

        impl $crate::Deserializable for $name {
            fn deserialize(buf: $crate::deserialize::Buffer) -> $crate::deserialize::Result<Self> {
                let id = <u32 as $crate::Deserializable>::deserialize(buf)?;
                if id != <Self as $crate::Identifiable>::CONSTRUCTOR_ID {
                    return Err($crate::deserialize::Error::UnexpectedConstructor { id });
                }
                Self::deserialize_bare(buf)
            }
        }

        impl $name {
            /// Read the fields only (the constructor ID was already consumed).
            #[allow(unused_variables)]
            pub fn deserialize_bare(buf: $crate::deserialize::Buffer) -> $crate::deserialize::Result<Self> {
                Ok(Self {
                    $( $field: <$ty as $crate::Deserializable>::deserialize(buf)?, )*
                })
            }
        }
    };
}

/// A boxed type with several constructors.
///
/// Decoding peeks at the constructor ID and dispatches to the matching
/// variant; an ID outside the union is rejected without consuming input.
macro_rules! tl_enum {
    (
        $(#[doc = $doc:literal])*
        pub enum $name:ident {
            $( $variant:ident ( $ty:ty ) ),+ $(,)?
        }
    ) => {
        $(#[doc = $doc])*
        #[derive(Clone, Debug, PartialEq)]
        pub enum $name {
            $( $variant($ty), )+
        }

        impl $name {
            /// Constructor IDs this union accepts, in declaration order.
            pub const CONSTRUCTOR_IDS: &'static [u32] =
                &[ $( <$ty as $crate::Identifiable>::CONSTRUCTOR_ID ),+ ];
        }

        impl $crate::Serializable for $name {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                match self {
                    $( Self::$variant(x) => $crate::Serializable::serialize(x, buf), )+
                }
            }
        }

        impl $crate::Deserializable for $name {
            fn deserialize(buf: $crate::deserialize::Buffer) -> $crate::deserialize::Result<Self> {
                let id = buf.peek_u32()?;
                $(
                    if id == <$ty as $crate::Identifiable>::CONSTRUCTOR_ID {
                        return Ok(Self::$variant(<$ty as $crate::Deserializable>::deserialize(buf)?));
                    }
                )+
                Err($crate::deserialize::Error::UnexpectedConstructor { id })
            }
        }

        $(
            impl From<$ty> for $name {
                fn from(x: $ty) -> Self { Self::$variant(x) }
            }
        )+
    };
}

/// An RPC function: a [`tl_struct!`] plus its [`crate::RemoteCall`] return type.
macro_rules! tl_function {
    (
        $(#[doc = $doc:literal])*
        #[tl(id = $id:literal, name = $tl_name:literal, returns = $ret:ty)]
        pub struct $name:ident {
            $( $(#[doc = $fdoc:literal])* pub $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        tl_struct! {
            $(#[doc = $doc])*
            #[tl(id = $id, name = $tl_name)]
            pub struct $name {
                $( $(#[doc = $fdoc])* pub $field: $ty ),*
            }
        }

        impl $crate::RemoteCall for $name {
            type Return = $ret;
        }
    };
}
