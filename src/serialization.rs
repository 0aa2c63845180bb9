//! Typed binary serialization format.
//!
//! A compact `serde` data format for variable-shaped records. A stream starts with a header: a format marker,
//! the format version and a flag telling whether every value is preceded by a one-byte type tag. Scalars are
//! written as fixed-width little-endian values, strings, byte arrays, sequences and maps are prefixed with their
//! element count as a `u16`, options with a `u8` presence flag and enum variants with their `u32` index. Structs
//! and tuples are written field by field.
//!
//! The format is not self-describing: data can only be read back into the types it was written from.

use std::error;
use std::fmt;
use std::fmt::Display;
use std::io::{self, Read, Write};

use serde::de::{self, DeserializeOwned, DeserializeSeed, IntoDeserializer, Visitor};
use serde::ser;
use serde::{Deserialize, Serialize};

/// Format marker every serialized stream starts with.
pub const MARKER: &str = "EXT-MERGE SERIALIZATION";
/// Format version.
pub const VERSION: u16 = 1;

/// Serialization error.
#[derive(Debug)]
pub enum Error {
    /// Input ended in the middle of a value.
    OutOfBytes,
    /// Declared array length exceeds the capacity of the destination buffer.
    ArrayTooShort { declared: usize, capacity: usize },
    /// Type tag of a value differs from the tag of the requested type.
    TypeMismatch { expected: u8, found: u8 },
    /// Read value differs from the expected one.
    VerificationFailed,
    /// Sequence, map or string is too long for its `u16` length prefix.
    LengthOverflow(usize),
    /// Sequence or map length is not known upfront.
    UnknownLength,
    /// Stream header is missing or has an unsupported version.
    BadHeader,
    /// The requested type needs a self-describing format.
    NotSelfDescribing,
    /// Read bytes do not represent a value of the requested type.
    InvalidValue(String),
    /// Custom error raised by a `Serialize` or `Deserialize` implementation.
    Message(String),
    /// Underlying reader or writer error.
    IO(io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self {
            Error::IO(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            Error::OutOfBytes => write!(f, "out of bytes"),
            Error::ArrayTooShort { declared, capacity } => {
                write!(f, "array too short: {} items declared, capacity {}", declared, capacity)
            }
            Error::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected tag {}, found {}", expected, found)
            }
            Error::VerificationFailed => write!(f, "verification failed"),
            Error::LengthOverflow(len) => write!(f, "length {} does not fit the length prefix", len),
            Error::UnknownLength => write!(f, "sequence length must be known"),
            Error::BadHeader => write!(f, "bad serialization header"),
            Error::NotSelfDescribing => write!(f, "format is not self-describing"),
            Error::InvalidValue(msg) => write!(f, "invalid value: {}", msg),
            Error::Message(msg) => write!(f, "{}", msg),
            Error::IO(err) => write!(f, "{}", err),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Error::OutOfBytes,
            _ => Error::IO(err),
        }
    }
}

impl ser::Error for Error {
    fn custom<T: Display>(msg: T) -> Self {
        Error::Message(msg.to_string())
    }
}

impl de::Error for Error {
    fn custom<T: Display>(msg: T) -> Self {
        Error::Message(msg.to_string())
    }
}

/// Type tags written before values in typesafe mode.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Bool = 1,
    I8,
    I16,
    I32,
    I64,
    I128,
    U8,
    U16,
    U32,
    U64,
    U128,
    F32,
    F64,
    Char,
    Str,
    Bytes,
    Option,
    Unit,
    Seq,
    Tuple,
    Map,
    Struct,
    Enum,
}

/// Binary serializer writing to an [`io::Write`].
pub struct Serializer<W> {
    out: W,
    typesafe: bool,
}

impl<W: Write> Serializer<W> {
    /// Creates a serializer and writes the stream header.
    ///
    /// # Arguments
    /// * `out` - Destination writer
    /// * `typesafe` - Whether every value is preceded by a type tag
    pub fn new(out: W, typesafe: bool) -> Result<Self> {
        let mut serializer = Serializer { out, typesafe: false };
        serializer.write_len(MARKER.len())?;
        serializer.out.write_all(MARKER.as_bytes())?;
        serializer.out.write_all(&VERSION.to_le_bytes())?;
        serializer.out.write_all(&[typesafe as u8])?;
        serializer.typesafe = typesafe;

        return Ok(serializer);
    }

    pub fn typesafe(&self) -> bool {
        self.typesafe
    }

    /// Serializes a single value.
    pub fn write<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        value.serialize(&mut *self)
    }

    /// Serializes a slice as a length-prefixed sequence. It can be read back with [`Deserializer::read_into`]
    /// or as a `Vec`.
    pub fn write_slice<T: Serialize>(&mut self, items: &[T]) -> Result<()> {
        self.write_tag(Tag::Seq)?;
        self.write_len(items.len())?;
        for item in items {
            item.serialize(&mut *self)?;
        }

        return Ok(());
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_tag(&mut self, tag: Tag) -> Result<()> {
        if self.typesafe {
            self.out.write_all(&[tag as u8])?;
        }
        Ok(())
    }

    fn write_len(&mut self, len: usize) -> Result<()> {
        let prefix = u16::try_from(len).map_err(|_| Error::LengthOverflow(len))?;
        self.out.write_all(&prefix.to_le_bytes())?;
        Ok(())
    }

    fn write_variant(&mut self, variant_index: u32) -> Result<()> {
        self.write_tag(Tag::Enum)?;
        self.out.write_all(&variant_index.to_le_bytes())?;
        Ok(())
    }
}

macro_rules! serialize_number {
    ($method:ident, $type:ty, $tag:expr) => {
        fn $method(self, value: $type) -> Result<()> {
            self.write_tag($tag)?;
            self.out.write_all(&value.to_le_bytes())?;
            Ok(())
        }
    };
}

impl<'a, W: Write> ser::Serializer for &'a mut Serializer<W> {
    type Ok = ();
    type Error = Error;

    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    serialize_number!(serialize_i8, i8, Tag::I8);
    serialize_number!(serialize_i16, i16, Tag::I16);
    serialize_number!(serialize_i32, i32, Tag::I32);
    serialize_number!(serialize_i64, i64, Tag::I64);
    serialize_number!(serialize_i128, i128, Tag::I128);
    serialize_number!(serialize_u8, u8, Tag::U8);
    serialize_number!(serialize_u16, u16, Tag::U16);
    serialize_number!(serialize_u32, u32, Tag::U32);
    serialize_number!(serialize_u64, u64, Tag::U64);
    serialize_number!(serialize_u128, u128, Tag::U128);
    serialize_number!(serialize_f32, f32, Tag::F32);
    serialize_number!(serialize_f64, f64, Tag::F64);

    fn serialize_bool(self, value: bool) -> Result<()> {
        self.write_tag(Tag::Bool)?;
        self.out.write_all(&[value as u8])?;
        Ok(())
    }

    fn serialize_char(self, value: char) -> Result<()> {
        self.write_tag(Tag::Char)?;
        self.out.write_all(&(value as u32).to_le_bytes())?;
        Ok(())
    }

    fn serialize_str(self, value: &str) -> Result<()> {
        self.write_tag(Tag::Str)?;
        self.write_len(value.len())?;
        self.out.write_all(value.as_bytes())?;
        Ok(())
    }

    fn serialize_bytes(self, value: &[u8]) -> Result<()> {
        self.write_tag(Tag::Bytes)?;
        self.write_len(value.len())?;
        self.out.write_all(value)?;
        Ok(())
    }

    fn serialize_none(self) -> Result<()> {
        self.write_tag(Tag::Option)?;
        self.out.write_all(&[0])?;
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<()> {
        self.write_tag(Tag::Option)?;
        self.out.write_all(&[1])?;
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<()> {
        self.write_tag(Tag::Unit)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<()> {
        self.write_tag(Tag::Unit)
    }

    fn serialize_unit_variant(self, _name: &'static str, variant_index: u32, _variant: &'static str) -> Result<()> {
        self.write_variant(variant_index)
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(self, _name: &'static str, value: &T) -> Result<()> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
        value: &T,
    ) -> Result<()> {
        self.write_variant(variant_index)?;
        value.serialize(self)
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<Self::SerializeSeq> {
        let len = len.ok_or(Error::UnknownLength)?;
        self.write_tag(Tag::Seq)?;
        self.write_len(len)?;
        Ok(self)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple> {
        self.write_tag(Tag::Tuple)?;
        Ok(self)
    }

    fn serialize_tuple_struct(self, _name: &'static str, _len: usize) -> Result<Self::SerializeTupleStruct> {
        self.write_tag(Tag::Tuple)?;
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        self.write_variant(variant_index)?;
        Ok(self)
    }

    fn serialize_map(self, len: Option<usize>) -> Result<Self::SerializeMap> {
        let len = len.ok_or(Error::UnknownLength)?;
        self.write_tag(Tag::Map)?;
        self.write_len(len)?;
        Ok(self)
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self::SerializeStruct> {
        self.write_tag(Tag::Struct)?;
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        self.write_variant(variant_index)?;
        Ok(self)
    }

    fn is_human_readable(&self) -> bool {
        false
    }
}

impl<'a, W: Write> ser::SerializeSeq for &'a mut Serializer<W> {
    type Ok = ();
    type Error = Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl<'a, W: Write> ser::SerializeTuple for &'a mut Serializer<W> {
    type Ok = ();
    type Error = Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl<'a, W: Write> ser::SerializeTupleStruct for &'a mut Serializer<W> {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl<'a, W: Write> ser::SerializeTupleVariant for &'a mut Serializer<W> {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl<'a, W: Write> ser::SerializeMap for &'a mut Serializer<W> {
    type Ok = ();
    type Error = Error;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<()> {
        key.serialize(&mut **self)
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl<'a, W: Write> ser::SerializeStruct for &'a mut Serializer<W> {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, _key: &'static str, value: &T) -> Result<()> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl<'a, W: Write> ser::SerializeStructVariant for &'a mut Serializer<W> {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, _key: &'static str, value: &T) -> Result<()> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

/// Binary deserializer reading from an [`io::Read`].
pub struct Deserializer<R> {
    input: R,
    typesafe: bool,
}

impl<R: Read> Deserializer<R> {
    /// Creates a deserializer and validates the stream header.
    pub fn new(input: R) -> Result<Self> {
        let mut deserializer = Deserializer { input, typesafe: false };

        let marker_len = deserializer.read_len().map_err(|_| Error::BadHeader)?;
        let mut marker = vec![0; marker_len];
        deserializer.input.read_exact(&mut marker).map_err(|_| Error::BadHeader)?;
        if marker != MARKER.as_bytes() {
            return Err(Error::BadHeader);
        }

        let mut version = [0; 2];
        deserializer.input.read_exact(&mut version).map_err(|_| Error::BadHeader)?;
        if u16::from_le_bytes(version) != VERSION {
            return Err(Error::BadHeader);
        }

        deserializer.typesafe = match deserializer.read_byte().map_err(|_| Error::BadHeader)? {
            0 => false,
            1 => true,
            _ => return Err(Error::BadHeader),
        };

        return Ok(deserializer);
    }

    pub fn typesafe(&self) -> bool {
        self.typesafe
    }

    /// Deserializes a single value.
    pub fn read<T: DeserializeOwned>(&mut self) -> Result<T> {
        T::deserialize(&mut *self)
    }

    /// Deserializes a length-prefixed sequence into `buffer`. Returns the number of items read.
    /// Fails with [`Error::ArrayTooShort`] if the sequence does not fit the buffer.
    pub fn read_into<T: DeserializeOwned>(&mut self, buffer: &mut [T]) -> Result<usize> {
        self.check_tag(Tag::Seq)?;
        let len = self.read_len()?;
        if len > buffer.len() {
            return Err(Error::ArrayTooShort {
                declared: len,
                capacity: buffer.len(),
            });
        }

        for item in buffer[..len].iter_mut() {
            *item = self.read()?;
        }

        return Ok(len);
    }

    /// Reads a value and checks it equals `expected`.
    pub fn verify<T: DeserializeOwned + PartialEq>(&mut self, expected: &T) -> Result<()> {
        let actual: T = self.read()?;
        if &actual != expected {
            return Err(Error::VerificationFailed);
        }
        Ok(())
    }

    pub fn into_inner(self) -> R {
        self.input
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut byte = [0; 1];
        self.input.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    fn read_len(&mut self) -> Result<usize> {
        let mut prefix = [0; 2];
        self.input.read_exact(&mut prefix)?;
        Ok(u16::from_le_bytes(prefix) as usize)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut bytes = [0; 4];
        self.input.read_exact(&mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_buf(&mut self) -> Result<Vec<u8>> {
        let len = self.read_len()?;
        let mut buf = vec![0; len];
        self.input.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn check_tag(&mut self, expected: Tag) -> Result<()> {
        if !self.typesafe {
            return Ok(());
        }

        let found = self.read_byte()?;
        if found != expected as u8 {
            return Err(Error::TypeMismatch {
                expected: expected as u8,
                found,
            });
        }
        Ok(())
    }
}

macro_rules! deserialize_number {
    ($method:ident, $visit:ident, $type:ty, $tag:expr) => {
        fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
            self.check_tag($tag)?;
            let mut bytes = [0; std::mem::size_of::<$type>()];
            self.input.read_exact(&mut bytes)?;
            visitor.$visit(<$type>::from_le_bytes(bytes))
        }
    };
}

impl<'de, 'a, R: Read> de::Deserializer<'de> for &'a mut Deserializer<R> {
    type Error = Error;

    deserialize_number!(deserialize_i8, visit_i8, i8, Tag::I8);
    deserialize_number!(deserialize_i16, visit_i16, i16, Tag::I16);
    deserialize_number!(deserialize_i32, visit_i32, i32, Tag::I32);
    deserialize_number!(deserialize_i64, visit_i64, i64, Tag::I64);
    deserialize_number!(deserialize_i128, visit_i128, i128, Tag::I128);
    deserialize_number!(deserialize_u8, visit_u8, u8, Tag::U8);
    deserialize_number!(deserialize_u16, visit_u16, u16, Tag::U16);
    deserialize_number!(deserialize_u32, visit_u32, u32, Tag::U32);
    deserialize_number!(deserialize_u64, visit_u64, u64, Tag::U64);
    deserialize_number!(deserialize_u128, visit_u128, u128, Tag::U128);
    deserialize_number!(deserialize_f32, visit_f32, f32, Tag::F32);
    deserialize_number!(deserialize_f64, visit_f64, f64, Tag::F64);

    fn deserialize_any<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value> {
        Err(Error::NotSelfDescribing)
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.check_tag(Tag::Bool)?;
        match self.read_byte()? {
            0 => visitor.visit_bool(false),
            1 => visitor.visit_bool(true),
            byte => Err(Error::InvalidValue(format!("{} is not a bool", byte))),
        }
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.check_tag(Tag::Char)?;
        let code = self.read_u32()?;
        match char::from_u32(code) {
            Some(value) => visitor.visit_char(value),
            None => Err(Error::InvalidValue(format!("{:#x} is not a char", code))),
        }
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.check_tag(Tag::Str)?;
        let buf = self.read_buf()?;
        let value = String::from_utf8(buf).map_err(|err| Error::InvalidValue(err.to_string()))?;
        visitor.visit_string(value)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.check_tag(Tag::Bytes)?;
        let buf = self.read_buf()?;
        visitor.visit_byte_buf(buf)
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.check_tag(Tag::Option)?;
        match self.read_byte()? {
            0 => visitor.visit_none(),
            1 => visitor.visit_some(self),
            byte => Err(Error::InvalidValue(format!("{} is not an option flag", byte))),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.check_tag(Tag::Unit)?;
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(self, _name: &'static str, visitor: V) -> Result<V::Value> {
        self.deserialize_unit(visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(self, _name: &'static str, visitor: V) -> Result<V::Value> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.check_tag(Tag::Seq)?;
        let remaining = self.read_len()?;
        visitor.visit_seq(Counted { de: self, remaining })
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, len: usize, visitor: V) -> Result<V::Value> {
        self.check_tag(Tag::Tuple)?;
        visitor.visit_seq(Counted { de: self, remaining: len })
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        len: usize,
        visitor: V,
    ) -> Result<V::Value> {
        self.deserialize_tuple(len, visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.check_tag(Tag::Map)?;
        let remaining = self.read_len()?;
        visitor.visit_map(Counted { de: self, remaining })
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        self.check_tag(Tag::Struct)?;
        visitor.visit_seq(Counted {
            de: self,
            remaining: fields.len(),
        })
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        self.check_tag(Tag::Enum)?;
        visitor.visit_enum(self)
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value> {
        Err(Error::NotSelfDescribing)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value> {
        Err(Error::NotSelfDescribing)
    }

    fn is_human_readable(&self) -> bool {
        false
    }
}

/// Access to a known number of consecutive values.
struct Counted<'a, R> {
    de: &'a mut Deserializer<R>,
    remaining: usize,
}

impl<'de, 'a, R: Read> de::SeqAccess<'de> for Counted<'a, R> {
    type Error = Error;

    fn next_element_seed<S: DeserializeSeed<'de>>(&mut self, seed: S) -> Result<Option<S::Value>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        seed.deserialize(&mut *self.de).map(Some)
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.remaining)
    }
}

impl<'de, 'a, R: Read> de::MapAccess<'de> for Counted<'a, R> {
    type Error = Error;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        seed.deserialize(&mut *self.de).map(Some)
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value> {
        seed.deserialize(&mut *self.de)
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.remaining)
    }
}

impl<'de, 'a, R: Read> de::EnumAccess<'de> for &'a mut Deserializer<R> {
    type Error = Error;
    type Variant = Self;

    fn variant_seed<S: DeserializeSeed<'de>>(self, seed: S) -> Result<(S::Value, Self)> {
        let index: de::value::U32Deserializer<Error> = self.read_u32()?.into_deserializer();
        let variant = seed.deserialize(index)?;
        Ok((variant, self))
    }
}

impl<'de, 'a, R: Read> de::VariantAccess<'de> for &'a mut Deserializer<R> {
    type Error = Error;

    fn unit_variant(self) -> Result<()> {
        Ok(())
    }

    fn newtype_variant_seed<S: DeserializeSeed<'de>>(self, seed: S) -> Result<S::Value> {
        seed.deserialize(self)
    }

    fn tuple_variant<V: Visitor<'de>>(self, len: usize, visitor: V) -> Result<V::Value> {
        visitor.visit_seq(Counted { de: self, remaining: len })
    }

    fn struct_variant<V: Visitor<'de>>(self, fields: &'static [&'static str], visitor: V) -> Result<V::Value> {
        visitor.visit_seq(Counted {
            de: self,
            remaining: fields.len(),
        })
    }
}

/// Serializes `value` into a new byte vector, header included.
pub fn to_vec<T: Serialize + ?Sized>(value: &T, typesafe: bool) -> Result<Vec<u8>> {
    let mut serializer = Serializer::new(Vec::new(), typesafe)?;
    serializer.write(value)?;
    Ok(serializer.into_inner())
}

/// Deserializes a single value from `bytes` written by [`to_vec`].
pub fn from_slice<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    Deserializer::new(bytes)?.read()
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use rstest::*;
    use serde::{Deserialize, Serialize};

    use super::{from_slice, to_vec, Deserializer, Error, Serializer, MARKER};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum Shape {
        Empty,
        Circle(f64),
        Rect { width: u32, height: u32 },
        Path(Vec<(i16, i16)>),
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        id: u64,
        name: String,
        tags: Vec<String>,
        parent: Option<u64>,
        shape: Shape,
        digest: [u8; 4],
        flag: bool,
        initial: char,
    }

    fn record() -> Record {
        Record {
            id: 42,
            name: String::from("alpha"),
            tags: vec![String::from("x"), String::from("yz")],
            parent: None,
            shape: Shape::Rect { width: 3, height: 4 },
            digest: [1, 2, 3, 4],
            flag: true,
            initial: 'λ',
        }
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn test_records(#[case] typesafe: bool) {
        let shapes = vec![
            Shape::Empty,
            Shape::Circle(1.5),
            Shape::Path(vec![(1, -1), (-7, 8)]),
        ];
        let mut index = BTreeMap::new();
        index.insert(String::from("a"), 1u16);
        index.insert(String::from("b"), 2u16);

        let mut serializer = Serializer::new(Vec::new(), typesafe).unwrap();
        serializer.write(&record()).unwrap();
        serializer.write(&shapes).unwrap();
        serializer.write(&index).unwrap();
        serializer.write(&Some(-3i128)).unwrap();
        let bytes = serializer.into_inner();

        let mut deserializer = Deserializer::new(bytes.as_slice()).unwrap();
        assert_eq!(deserializer.typesafe(), typesafe);
        assert_eq!(deserializer.read::<Record>().unwrap(), record());
        assert_eq!(deserializer.read::<Vec<Shape>>().unwrap(), shapes);
        assert_eq!(deserializer.read::<BTreeMap<String, u16>>().unwrap(), index);
        assert_eq!(deserializer.read::<Option<i128>>().unwrap(), Some(-3));
        assert!(matches!(deserializer.read::<u8>(), Err(Error::OutOfBytes)));
    }

    #[rstest]
    fn test_plain_layout() {
        let bytes = to_vec(&(7u16, String::from("ab")), false).unwrap();
        let header = 2 + MARKER.len() + 2 + 1;

        assert_eq!(&bytes[header..], &[7, 0, 2, 0, b'a', b'b']);
    }

    #[rstest]
    fn test_type_mismatch() {
        let bytes = to_vec(&5u32, true).unwrap();
        assert!(matches!(from_slice::<i32>(&bytes), Err(Error::TypeMismatch { .. })));
        assert_eq!(from_slice::<u32>(&bytes).unwrap(), 5);

        // without tags the same bytes are silently reinterpreted
        let bytes = to_vec(&5u32, false).unwrap();
        assert_eq!(from_slice::<i32>(&bytes).unwrap(), 5);
    }

    #[rstest]
    fn test_out_of_bytes() {
        let bytes = to_vec(&record(), false).unwrap();
        let result = from_slice::<Record>(&bytes[..bytes.len() - 3]);

        assert!(matches!(result, Err(Error::OutOfBytes)));
    }

    #[rstest]
    fn test_read_into() {
        let mut serializer = Serializer::new(Vec::new(), true).unwrap();
        serializer.write_slice(&[10u32, 20, 30]).unwrap();
        serializer.write_slice(&[1u32, 2, 3, 4, 5]).unwrap();
        serializer.write_slice(&[6u32, 7]).unwrap();
        let bytes = serializer.into_inner();

        let mut deserializer = Deserializer::new(bytes.as_slice()).unwrap();
        let mut buffer = [0u32; 4];
        assert_eq!(deserializer.read_into(&mut buffer).unwrap(), 3);
        assert_eq!(buffer, [10, 20, 30, 0]);

        let result = deserializer.read_into(&mut buffer);
        assert!(matches!(result, Err(Error::ArrayTooShort { declared: 5, capacity: 4 })));
    }

    #[rstest]
    fn test_slice_reads_as_vec() {
        let mut serializer = Serializer::new(Vec::new(), true).unwrap();
        serializer.write_slice(&[6u32, 7]).unwrap();
        let bytes = serializer.into_inner();

        assert_eq!(from_slice::<Vec<u32>>(&bytes).unwrap(), vec![6, 7]);
    }

    #[rstest]
    fn test_verify() {
        let mut serializer = Serializer::new(Vec::new(), false).unwrap();
        serializer.write("checkpoint").unwrap();
        serializer.write(&3u16).unwrap();
        let bytes = serializer.into_inner();

        let mut deserializer = Deserializer::new(bytes.as_slice()).unwrap();
        deserializer.verify(&String::from("checkpoint")).unwrap();
        assert!(matches!(deserializer.verify(&4u16), Err(Error::VerificationFailed)));
    }

    #[rstest]
    fn test_bad_header() {
        assert!(matches!(Deserializer::new(&b"garbage"[..]), Err(Error::BadHeader)));
        assert!(matches!(Deserializer::new(&b""[..]), Err(Error::BadHeader)));

        let mut bytes = to_vec(&1u8, false).unwrap();
        bytes[2 + MARKER.len()] = 9;
        assert!(matches!(Deserializer::new(bytes.as_slice()), Err(Error::BadHeader)));
    }

    #[rstest]
    fn test_length_overflow() {
        let long = vec![0u8; u16::MAX as usize + 1];
        let result = to_vec(&long, false);

        assert!(matches!(result, Err(Error::LengthOverflow(len)) if len == long.len()));
    }
}
