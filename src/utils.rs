/**
 * Various misc. utility functions, mostly for debug/trace logs
 */

/**
 * Encodes a byte slice into a hexadecimal string with each byte separated by a comma.
 *
 * @param buffer The byte slice to encode.
 * @return The comma separated hex representation
 */
pub(crate) fn hex_encode_delimited(buffer: &[u8]) -> String {
    buffer
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect::<Vec<_>>()
        .join(",")
}

/**
 * Transaction id as one hex string, magic cookie (or legacy word) first.
 */
pub(crate) fn format_transaction_id(transaction_id: &[u32; 4]) -> String {
    let bytes: Vec<u8> = transaction_id.iter().flat_map(|w| w.to_be_bytes()).collect();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_encode_delimited() {
        assert_eq!(hex_encode_delimited(&[0x00, 0x01, 0xab]), "00,01,ab");
        assert_eq!(hex_encode_delimited(&[]), "");
    }

    #[test]
    fn test_format_transaction_id() {
        assert_eq!(
            format_transaction_id(&[0x2112a442, 0xb7e7a701, 0xbc34d686, 0xfa87dfae]),
            "2112a442b7e7a701bc34d686fa87dfae"
        );
    }
}
