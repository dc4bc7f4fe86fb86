/// Millimetres per inch
pub const MM_PER_INCH: f64 = 25.4;

/// Convert a desk height in millimetres to inches
pub fn to_inches(mm: u16) -> f64 {
    f64::from(mm) / MM_PER_INCH
}
