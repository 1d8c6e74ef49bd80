//! The [`Serializable`] trait and its implementations for primitive TL types.
//!
//! Everything is little-endian and padded to a 4-byte boundary, as described
//! by the [MTProto Binary Serialization] rules.
//!
//! [MTProto Binary Serialization]: https://core.telegram.org/mtproto/serialize

/// Constructor ID of the boxed `Vector t` type.
pub const VECTOR_ID: u32 = 0x1cb5c415;

/// Serialize `self` into TL binary format.
pub trait Serializable {
    /// Appends the serialized form of `self` to `buf`.
    fn serialize(&self, buf: &mut impl Extend<u8>);

    /// Convenience: allocate a fresh `Vec<u8>` and serialize into it.
    fn to_bytes(&self) -> Vec<u8> {
        let mut v = Vec::new();
        self.serialize(&mut v);
        v
    }
}

// ─── bool ────────────────────────────────────────────────────────────────────

/// `true`  → `boolTrue#997275b5`
/// `false` → `boolFalse#bc799737`
impl Serializable for bool {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        let id: u32 = if *self { 0x997275b5 } else { 0xbc799737 };
        id.serialize(buf);
    }
}

// ─── numbers / fixed-size blobs ──────────────────────────────────────────────

macro_rules! le_bytes {
    ($($ty:ty),+) => {$(
        impl Serializable for $ty {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                buf.extend(self.to_le_bytes());
            }
        }
    )+};
}

le_bytes!(i32, u32, i64, f64);

/// `int128` and `int256` are raw byte arrays, written as-is.
impl<const N: usize> Serializable for [u8; N] {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.iter().copied());
    }
}

// ─── strings / bytes ─────────────────────────────────────────────────────────

/// Writes the TL `bytes` encoding of `data`.
///
/// * `len ≤ 253`: `[len][data][pad]`
/// * `len ≥ 254`: `[0xfe][len: 3 bytes LE][data][pad]`
///
/// where `pad` zero-fills to the next multiple of 4.
pub fn serialize_bytes(data: &[u8], buf: &mut impl Extend<u8>) {
    let len = data.len();
    let header_len = if len <= 253 {
        buf.extend([len as u8]);
        1
    } else {
        buf.extend([0xfe, len as u8, (len >> 8) as u8, (len >> 16) as u8]);
        4
    };
    buf.extend(data.iter().copied());
    let padding = (4 - (header_len + len) % 4) % 4;
    buf.extend(std::iter::repeat_n(0u8, padding));
}

impl Serializable for [u8] {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        serialize_bytes(self, buf);
    }
}

impl Serializable for Vec<u8> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        serialize_bytes(self, buf);
    }
}

impl Serializable for String {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        serialize_bytes(self.as_bytes(), buf);
    }
}

impl Serializable for str {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        serialize_bytes(self.as_bytes(), buf);
    }
}

// ─── vectors ─────────────────────────────────────────────────────────────────

/// Boxed `Vector<T>`, prefixed with constructor ID `0x1cb5c415`.
impl<T: Serializable> Serializable for Vec<T> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        VECTOR_ID.serialize(buf);
        serialize_items(self, buf);
    }
}

/// Bare `vector<T>`: just a count followed by items, no constructor ID.
impl<T: Serializable> Serializable for crate::RawVec<T> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        serialize_items(&self.0, buf);
    }
}

fn serialize_items<T: Serializable>(items: &[T], buf: &mut impl Extend<u8>) {
    (items.len() as i32).serialize(buf);
    for item in items {
        item.serialize(buf);
    }
}

// ─── opaque payloads ─────────────────────────────────────────────────────────

/// A [`crate::Blob`] is already serialized; it is written through untouched.
impl Serializable for crate::Blob {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.0.iter().copied());
    }
}

impl<T: Serializable + ?Sized> Serializable for &T {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        (**self).serialize(buf);
    }
}
