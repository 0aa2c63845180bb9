//! Fixed-size record encoding.

/// Record interface. A record is a plain value with a fixed binary layout so that record `i` of a stream
/// can be located at byte offset `i * SIZE`.
pub trait Record: Copy + Send + Sync + 'static {
    /// Encoded record size in bytes.
    const SIZE: usize;

    /// Encodes the record into the first [`Record::SIZE`] bytes of `buf`.
    fn encode(&self, buf: &mut [u8]);

    /// Decodes a record from the first [`Record::SIZE`] bytes of `buf`.
    fn decode(buf: &[u8]) -> Self;
}

macro_rules! impl_record_for_primitive {
    ($($t:ty),*) => {
        $(
            impl Record for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                #[inline]
                fn encode(&self, buf: &mut [u8]) {
                    buf[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn decode(buf: &[u8]) -> Self {
                    let mut bytes = [0u8; std::mem::size_of::<$t>()];
                    bytes.copy_from_slice(&buf[..Self::SIZE]);
                    <$t>::from_le_bytes(bytes)
                }
            }
        )*
    };
}

impl_record_for_primitive!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64);

impl<R: Record, const N: usize> Record for [R; N] {
    const SIZE: usize = R::SIZE * N;

    fn encode(&self, buf: &mut [u8]) {
        for (item, chunk) in self.iter().zip(buf.chunks_exact_mut(R::SIZE)) {
            item.encode(chunk);
        }
    }

    fn decode(buf: &[u8]) -> Self {
        std::array::from_fn(|i| R::decode(&buf[i * R::SIZE..]))
    }
}

impl<A: Record, B: Record> Record for (A, B) {
    const SIZE: usize = A::SIZE + B::SIZE;

    fn encode(&self, buf: &mut [u8]) {
        self.0.encode(&mut buf[..A::SIZE]);
        self.1.encode(&mut buf[A::SIZE..Self::SIZE]);
    }

    fn decode(buf: &[u8]) -> Self {
        (A::decode(&buf[..A::SIZE]), B::decode(&buf[A::SIZE..Self::SIZE]))
    }
}
