/// CRC-32 as stored by the container: reflected 0xEDB88320 polynomial,
/// zero seed and no final inversion.
#[inline]
pub fn compute_crc(data: &[u8]) -> u32 {
    update_crc(0, data)
}

/// Continue a CRC computation from a previous raw register value.
#[inline]
pub fn update_crc(crc: u32, data: &[u8]) -> u32 {
    // crc32fast inverts both ends.
    let mut hasher = crc32fast::Hasher::new_with_initial(!crc);
    hasher.update(data);
    !hasher.finalize()
}
