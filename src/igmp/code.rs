/// Max Resp Code / QQIC byte as carried in an IGMPv3 query.
///
/// Below 128 the byte is the value itself. From 128 up it is a floating point
/// number: `1 | exp (3 bits) | mant (4 bits)`, value = `(mant | 0x10) << (exp + 3)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct IgmpCode(u8);

impl IgmpCode {
    /// Largest value the encoding can carry (`0xff`).
    pub const MAX_VALUE: u32 = 31744;

    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    pub const fn value(self) -> u32 {
        if self.0 < 0x80 {
            return self.0 as u32;
        }
        let mant = (self.0 & 0x0f) as u32;
        let exp = ((self.0 >> 4) & 0x07) as u32;
        (mant | 0x10) << (exp + 3)
    }

    /// Encodes `value`, rounding down to the nearest representable value and
    /// saturating at [`Self::MAX_VALUE`].
    pub fn from_value(value: u32) -> Self {
        if value < 0x80 {
            return Self(value as u8);
        }

        let value = value.min(Self::MAX_VALUE);
        let mut exp = 0;
        while (value >> (exp + 3)) > 0x1f {
            exp += 1;
        }
        let mant = ((value >> (exp + 3)) & 0x0f) as u8;
        Self(0x80 | (exp as u8) << 4 | mant)
    }
}

impl From<u8> for IgmpCode {
    fn from(raw: u8) -> Self {
        Self(raw)
    }
}

impl From<IgmpCode> for u8 {
    fn from(code: IgmpCode) -> Self {
        code.0
    }
}
