//! Fixed-size plain values that can be pushed into a message body
//!
//! Values are written in host byte order. Composite values (arrays, tuples,
//! application records) are laid out field by field in declaration order with
//! no padding between fields.

/// A value with a fixed encoded size
///
/// `read_bytes` is always handed exactly `SIZE` bytes.
pub trait Pod: Sized {
    const SIZE: usize;

    fn write_bytes(&self, out: &mut Vec<u8>);

    fn read_bytes(bytes: &[u8]) -> Self;
}

macro_rules! impl_pod_for_numbers {
    ($($t:ty),* $(,)?) => {
        $(
            impl Pod for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                fn write_bytes(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_ne_bytes());
                }

                fn read_bytes(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    <$t>::from_ne_bytes(raw)
                }
            }
        )*
    };
}

impl_pod_for_numbers!(u8, i8, u16, i16, u32, i32, u64, i64, u128, i128, f32, f64);

// Pointer-sized integers are widened so both ends agree regardless of target.
impl Pod for usize {
    const SIZE: usize = 8;

    fn write_bytes(&self, out: &mut Vec<u8>) {
        (*self as u64).write_bytes(out);
    }

    fn read_bytes(bytes: &[u8]) -> Self {
        u64::read_bytes(bytes) as usize
    }
}

impl Pod for isize {
    const SIZE: usize = 8;

    fn write_bytes(&self, out: &mut Vec<u8>) {
        (*self as i64).write_bytes(out);
    }

    fn read_bytes(bytes: &[u8]) -> Self {
        i64::read_bytes(bytes) as isize
    }
}

impl Pod for bool {
    const SIZE: usize = 1;

    fn write_bytes(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }

    fn read_bytes(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

impl Pod for char {
    const SIZE: usize = 4;

    fn write_bytes(&self, out: &mut Vec<u8>) {
        (*self as u32).write_bytes(out);
    }

    fn read_bytes(bytes: &[u8]) -> Self {
        char::from_u32(u32::read_bytes(bytes)).unwrap_or(char::REPLACEMENT_CHARACTER)
    }
}

impl Pod for () {
    const SIZE: usize = 0;

    fn write_bytes(&self, _out: &mut Vec<u8>) {}

    fn read_bytes(_bytes: &[u8]) -> Self {}
}

impl<T: Pod, const N: usize> Pod for [T; N] {
    const SIZE: usize = T::SIZE * N;

    fn write_bytes(&self, out: &mut Vec<u8>) {
        for item in self {
            item.write_bytes(out);
        }
    }

    fn read_bytes(bytes: &[u8]) -> Self {
        std::array::from_fn(|i| T::read_bytes(&bytes[i * T::SIZE..(i + 1) * T::SIZE]))
    }
}

macro_rules! impl_pod_for_tuples {
    ($(($($ty:ident $field:ident),+)),* $(,)?) => {
        $(
            impl<$($ty: Pod),+> Pod for ($($ty,)+) {
                const SIZE: usize = 0 $(+ $ty::SIZE)+;

                fn write_bytes(&self, out: &mut Vec<u8>) {
                    let ($($field,)+) = self;
                    $($field.write_bytes(out);)+
                }

                fn read_bytes(bytes: &[u8]) -> Self {
                    let mut offset = 0;
                    $(
                        let $field = $ty::read_bytes(&bytes[offset..offset + $ty::SIZE]);
                        offset += $ty::SIZE;
                    )+
                    debug_assert_eq!(offset, Self::SIZE);
                    ($($field,)+)
                }
            }
        )*
    };
}

impl_pod_for_tuples!(
    (A a, B b),
    (A a, B b, C c),
    (A a, B b, C c, D d),
);
