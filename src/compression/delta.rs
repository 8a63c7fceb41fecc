use crate::compression::vbyte;
use crate::core::error::Result;

/// Delta + vbyte encoding for sorted u32 sequences. Token position
/// lists are ascending, so deltas stay small and vbyte-friendly.
pub fn encode_sorted(nums: &[u32]) -> Vec<u8> {
    let mut output = Vec::new();
    let mut prev = 0u32;

    for &num in nums {
        vbyte::encode_into(&mut output, num.wrapping_sub(prev));
        prev = num;
    }

    output
}

pub fn decode_sorted(data: &[u8]) -> Result<Vec<u32>> {
    let deltas = vbyte::decode_all(data)?;
    let mut nums = Vec::with_capacity(deltas.len());
    let mut prev = 0u32;

    for delta in deltas {
        prev = prev.wrapping_add(delta);
        nums.push(prev);
    }

    Ok(nums)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_sorted_positions() {
        let positions = vec![0u32, 1, 5, 5, 130, 4000];
        let encoded = encode_sorted(&positions);
        assert_eq!(decode_sorted(&encoded).unwrap(), positions);
    }

    #[test]
    fn empty_list_round_trips() {
        assert!(decode_sorted(&encode_sorted(&[])).unwrap().is_empty());
    }
}
