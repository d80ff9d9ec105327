//! # Attribute Serialization
//!
//! Turns application payload structs into packet payload bytes and back.
//!
//! A payload type declares its wire attributes once, in order, as a [`Schema`]. The
//! schema stores an accessor pair per field, so serializing walks the list and writes
//! each field with its fixed-width big-endian encoding. Deserializing walks the same
//! list in the same order.
//!
//! ## Wire Kinds
//! | Rust type                | Encoding                                   |
//! |--------------------------|--------------------------------------------|
//! | `u8` `i8`                | 1 byte                                     |
//! | `u16` `i16`              | 2 bytes, big-endian                        |
//! | `u32` `i32` `f32`        | 4 bytes, big-endian                        |
//! | `u64` `i64` `f64`        | 8 bytes, big-endian                        |
//! | `char`                   | 2 bytes, one UTF-16 code unit              |
//! | `String`                 | 1-byte length, then UTF-8 bytes (max 255)  |
//! | `Vec<A>` (fixed-width A) | 1-byte element count, then elements        |
//!
//! Fields whose type has no [`Attribute`] implementation are rejected when the schema
//! is declared, at compile time.
//!
//! ## Example
//! ```rust
//! use netmesh::core::attribute::{decode, serialize};
//! use netmesh::packet_object;
//!
//! #[derive(Debug, Default, PartialEq)]
//! struct Reading {
//!     sensor: u8,
//!     celsius: f32,
//!     label: String,
//! }
//!
//! packet_object!(Reading => "READ" { sensor: u8, celsius: f32, label: String });
//!
//! let reading = Reading { sensor: 3, celsius: 21.5, label: "attic".into() };
//! let bytes = serialize(&reading).unwrap();
//! assert_eq!(decode::<Reading>(&bytes).unwrap(), reading);
//! ```

use bytes::{Buf, BufMut, BytesMut};

use crate::core::packet::{format_type, TypeTag};
use crate::error::{constants, ProtocolError, Result};

/// Wire width of the fixed-size kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
    Char,
}

impl ScalarKind {
    pub const fn width(self) -> usize {
        match self {
            ScalarKind::U8 | ScalarKind::I8 => 1,
            ScalarKind::U16 | ScalarKind::I16 | ScalarKind::Char => 2,
            ScalarKind::U32 | ScalarKind::I32 | ScalarKind::F32 => 4,
            ScalarKind::U64 | ScalarKind::I64 | ScalarKind::F64 => 8,
        }
    }
}

/// Wire kind of a declared attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Scalar(ScalarKind),
    String,
    Array(ScalarKind),
}

/// A value that can appear as a payload attribute.
pub trait Attribute: Sized + Send + Sync + 'static {
    const KIND: AttributeKind;

    fn encoded_len(&self) -> usize;

    fn encode(&self, dst: &mut BytesMut) -> Result<()>;

    fn decode(src: &mut &[u8]) -> Result<Self>;
}

/// Attributes with a fixed encoded width; only these can be array elements.
pub trait FixedWidth: Attribute {
    const SCALAR: ScalarKind;
}

fn ensure_remaining(src: &[u8], needed: usize) -> Result<()> {
    if src.len() < needed {
        return Err(ProtocolError::Serialization(
            constants::ERR_ATTRIBUTE_TRUNCATED.into(),
        ));
    }
    Ok(())
}

macro_rules! scalar_attribute {
    ($($ty:ty => $kind:ident, $put:ident, $get:ident;)*) => {
        $(
            impl Attribute for $ty {
                const KIND: AttributeKind = AttributeKind::Scalar(ScalarKind::$kind);

                fn encoded_len(&self) -> usize {
                    ScalarKind::$kind.width()
                }

                fn encode(&self, dst: &mut BytesMut) -> Result<()> {
                    dst.$put(*self);
                    Ok(())
                }

                fn decode(src: &mut &[u8]) -> Result<Self> {
                    ensure_remaining(src, ScalarKind::$kind.width())?;
                    Ok(src.$get())
                }
            }

            impl FixedWidth for $ty {
                const SCALAR: ScalarKind = ScalarKind::$kind;
            }
        )*
    };
}

scalar_attribute! {
    u8 => U8, put_u8, get_u8;
    i8 => I8, put_i8, get_i8;
    u16 => U16, put_u16, get_u16;
    i16 => I16, put_i16, get_i16;
    u32 => U32, put_u32, get_u32;
    i32 => I32, put_i32, get_i32;
    u64 => U64, put_u64, get_u64;
    i64 => I64, put_i64, get_i64;
    f32 => F32, put_f32, get_f32;
    f64 => F64, put_f64, get_f64;
}

impl Attribute for char {
    const KIND: AttributeKind = AttributeKind::Scalar(ScalarKind::Char);

    fn encoded_len(&self) -> usize {
        ScalarKind::Char.width()
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let mut units = [0u16; 2];
        match self.encode_utf16(&mut units) {
            [unit] => {
                dst.put_u16(*unit);
                Ok(())
            }
            _ => Err(ProtocolError::Serialization(
                constants::ERR_CHAR_OUT_OF_RANGE.into(),
            )),
        }
    }

    fn decode(src: &mut &[u8]) -> Result<Self> {
        ensure_remaining(src, ScalarKind::Char.width())?;
        let unit = src.get_u16();
        char::from_u32(u32::from(unit))
            .ok_or_else(|| ProtocolError::Serialization(constants::ERR_CHAR_OUT_OF_RANGE.into()))
    }
}

impl FixedWidth for char {
    const SCALAR: ScalarKind = ScalarKind::Char;
}

impl Attribute for String {
    const KIND: AttributeKind = AttributeKind::String;

    fn encoded_len(&self) -> usize {
        1 + self.len()
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let len = u8::try_from(self.len())
            .map_err(|_| ProtocolError::Serialization(constants::ERR_STRING_TOO_LONG.into()))?;
        dst.put_u8(len);
        dst.put_slice(self.as_bytes());
        Ok(())
    }

    fn decode(src: &mut &[u8]) -> Result<Self> {
        ensure_remaining(src, 1)?;
        let len = src.get_u8() as usize;
        ensure_remaining(src, len)?;
        let text = std::str::from_utf8(&src[..len])
            .map_err(|_| ProtocolError::Serialization(constants::ERR_INVALID_UTF8.into()))?
            .to_owned();
        src.advance(len);
        Ok(text)
    }
}

impl<A: FixedWidth> Attribute for Vec<A> {
    const KIND: AttributeKind = AttributeKind::Array(A::SCALAR);

    fn encoded_len(&self) -> usize {
        1 + self.len() * A::SCALAR.width()
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let count = u8::try_from(self.len())
            .map_err(|_| ProtocolError::Serialization(constants::ERR_ARRAY_TOO_LONG.into()))?;
        dst.put_u8(count);
        for element in self {
            element.encode(dst)?;
        }
        Ok(())
    }

    fn decode(src: &mut &[u8]) -> Result<Self> {
        ensure_remaining(src, 1)?;
        let count = src.get_u8() as usize;
        ensure_remaining(src, count * A::SCALAR.width())?;
        (0..count).map(|_| A::decode(src)).collect()
    }
}

type LenFn<T> = Box<dyn Fn(&T) -> usize + Send + Sync>;
type WriteFn<T> = Box<dyn Fn(&T, &mut BytesMut) -> Result<()> + Send + Sync>;
type ReadFn<T> = Box<dyn Fn(&mut T, &mut &[u8]) -> Result<()> + Send + Sync>;

struct Field<T> {
    name: &'static str,
    kind: AttributeKind,
    len: LenFn<T>,
    write: WriteFn<T>,
    read: ReadFn<T>,
}

/// Ordered attribute list of one payload type.
pub struct Schema<T> {
    fields: Vec<Field<T>>,
}

impl<T: 'static> Schema<T> {
    pub fn builder() -> SchemaBuilder<T> {
        SchemaBuilder { fields: Vec::new() }
    }

    /// Declared fields as `(name, kind)`, in wire order.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, AttributeKind)> + '_ {
        self.fields.iter().map(|f| (f.name, f.kind))
    }

    pub fn encoded_len(&self, value: &T) -> usize {
        self.fields.iter().map(|f| (f.len)(value)).sum()
    }

    pub fn serialize(&self, value: &T) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(self.encoded_len(value));
        for field in &self.fields {
            (field.write)(value, &mut buf).map_err(|e| match e {
                ProtocolError::Serialization(reason) => {
                    ProtocolError::Serialization(format!("{}: {reason}", field.name))
                }
                other => other,
            })?;
        }
        Ok(buf.to_vec())
    }

    /// Overwrite every declared field of `target` from `data`.
    ///
    /// The payload must be consumed exactly; leftover bytes mean the sender used a
    /// different schema for this tag.
    pub fn deserialize(&self, data: &[u8], target: &mut T) -> Result<()> {
        let mut src = data;
        for field in &self.fields {
            (field.read)(target, &mut src)?;
        }
        if !src.is_empty() {
            return Err(ProtocolError::Serialization(
                constants::ERR_ATTRIBUTE_TRAILING.into(),
            ));
        }
        Ok(())
    }
}

pub struct SchemaBuilder<T> {
    fields: Vec<Field<T>>,
}

impl<T: 'static> SchemaBuilder<T> {
    /// Append an attribute; declaration order is wire order.
    pub fn field<A: Attribute>(
        mut self,
        name: &'static str,
        get: fn(&T) -> &A,
        get_mut: fn(&mut T) -> &mut A,
    ) -> Self {
        self.fields.push(Field {
            name,
            kind: A::KIND,
            len: Box::new(move |value| get(value).encoded_len()),
            write: Box::new(move |value, dst| get(value).encode(dst)),
            read: Box::new(move |target, src| {
                *get_mut(target) = A::decode(src)?;
                Ok(())
            }),
        });
        self
    }

    pub fn build(self) -> Schema<T> {
        Schema {
            fields: self.fields,
        }
    }
}

/// A payload type with a packet type tag and a declared attribute schema.
///
/// Usually implemented through [`packet_object!`](crate::packet_object).
pub trait PacketObject: Default + Send + 'static {
    const PACKET_TYPE: &'static str;

    fn schema() -> &'static Schema<Self>;

    fn packet_type() -> TypeTag {
        format_type(Self::PACKET_TYPE)
    }
}

/// Declare a payload type's tag and wire attributes.
///
/// ```rust
/// # use netmesh::packet_object;
/// #[derive(Default)]
/// struct Chat {
///     from: String,
///     text: String,
/// }
///
/// packet_object!(Chat => "CHAT" { from: String, text: String });
/// ```
#[macro_export]
macro_rules! packet_object {
    ($ty:ty => $tag:literal { $($field:ident : $kind:ty),* $(,)? }) => {
        impl $crate::core::attribute::PacketObject for $ty {
            const PACKET_TYPE: &'static str = $tag;

            fn schema() -> &'static $crate::core::attribute::Schema<Self> {
                static SCHEMA: $crate::__private::Lazy<$crate::core::attribute::Schema<$ty>> =
                    $crate::__private::Lazy::new(|| {
                        $crate::core::attribute::Schema::<$ty>::builder()
                            $(
                                .field::<$kind>(
                                    stringify!($field),
                                    |v: &$ty| &v.$field,
                                    |v: &mut $ty| &mut v.$field,
                                )
                            )*
                            .build()
                    });
                &SCHEMA
            }
        }
    };
}

pub fn serialize<T: PacketObject>(value: &T) -> Result<Vec<u8>> {
    T::schema().serialize(value)
}

pub fn deserialize<T: PacketObject>(data: &[u8], target: &mut T) -> Result<()> {
    T::schema().deserialize(data, target)
}

/// Deserialize into a fresh default instance.
pub fn decode<T: PacketObject>(data: &[u8]) -> Result<T> {
    let mut value = T::default();
    deserialize(data, &mut value)?;
    Ok(value)
}
