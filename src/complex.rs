#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Complex<T> {
    pub re: T,
    pub im: T,
}

impl<T> Complex<T> {
    pub fn new(re: T, im: T) -> Self {
        Self { re, im }
    }
}

/// A complex voltage sample as it comes out of the digitizer, widened to a byte per component
pub type ComplexByte = Complex<i8>;

/// Sign-extend a 4-bit component. Nibbles above 8 are negative, 8 itself stays positive.
#[inline]
fn nibble_to_i8(nibble: u8) -> i8 {
    if nibble > 8 {
        nibble as i8 - 16
    } else {
        nibble as i8
    }
}

impl ComplexByte {
    /// Unpack one 4-bit sample byte, real part in the high nibble
    #[inline]
    pub fn from_nibbles(byte: u8) -> Self {
        Self {
            re: nibble_to_i8(byte >> 4),
            im: nibble_to_i8(byte & 0x0f),
        }
    }

    /// Inverse of [`ComplexByte::from_nibbles`] for components in `-7..=8`
    #[inline]
    pub fn to_nibbles(self) -> u8 {
        ((self.re as u8 & 0x0f) << 4) | (self.im as u8 & 0x0f)
    }

    pub fn norm_sq(self) -> u16 {
        let re = self.re.unsigned_abs() as u16;
        let im = self.im.unsigned_abs() as u16;
        re * re + im * im
    }
}
