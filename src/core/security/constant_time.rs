/*!
Constant-time cryptographic operations.
*/

use subtle::ConstantTimeEq;

/// Compare two byte slices in constant time.
///
/// The comparison touches every byte regardless of where the slices differ.
/// Slices of different length compare unequal.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
