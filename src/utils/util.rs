/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/5/25
******************************************************************************/

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

/// Characters left as-is by TLCP request encoding; everything else is `%XX`.
const TLCP_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Parses a comma-separated TLCP line into its fields.
///
/// Text fields are percent-encoded by the server, so a raw comma is always a separator.
/// Empty fields are kept (`MSGDONE,*,3,` carries an empty response), and the trailing
/// `\r\n` of the line, if any, is stripped.
///
/// # Parameters
/// - `input`: one protocol line, e.g. `CONOK,S8f4aec42c3c14ad0,50000,5000,*`.
///
/// # Returns
/// A `Vec<&str>` with one entry per field, the first one being the line tag.
pub fn parse_arguments(input: &str) -> Vec<&str> {
    let line = input.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return Vec::new();
    }
    line.split(',').collect()
}

/// Percent-decodes a text field received from the server.
pub fn decode_text(text: &str) -> String {
    percent_decode_str(text).decode_utf8_lossy().into_owned()
}

/// Percent-encodes a request parameter value.
pub fn encode_text(text: &str) -> String {
    utf8_percent_encode(text, TLCP_ENCODE_SET).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    mod parse_arguments_tests {
        use super::*;

        #[test]
        fn test_parse_arguments_basic() {
            let result = parse_arguments("arg1,arg2,arg3");
            assert_eq!(result, vec!["arg1", "arg2", "arg3"]);
        }

        #[test]
        fn test_parse_arguments_empty_string() {
            assert_eq!(parse_arguments(""), Vec::<&str>::new());
            assert_eq!(parse_arguments("\r\n"), Vec::<&str>::new());
        }

        #[test]
        fn test_parse_arguments_keeps_empty_fields() {
            let result = parse_arguments("MSGDONE,*,3,");
            assert_eq!(result, vec!["MSGDONE", "*", "3", ""]);
        }

        #[test]
        fn test_parse_arguments_strips_line_terminator() {
            let result = parse_arguments("PROBE\r\n");
            assert_eq!(result, vec!["PROBE"]);
        }

        #[test]
        fn test_parse_arguments_protocol_examples() {
            let result = parse_arguments("CONOK,S8f4aec42c3c14ad0,50000,5000,*");
            assert_eq!(
                result,
                vec!["CONOK", "S8f4aec42c3c14ad0", "50000", "5000", "*"]
            );

            let result = parse_arguments("U,1,1,a|b|c");
            assert_eq!(result, vec!["U", "1", "1", "a|b|c"]);
        }
    }

    mod encoding_tests {
        use super::*;

        #[test]
        fn test_encode_text_reserved_characters() {
            assert_eq!(encode_text("a b&c=d"), "a%20b%26c%3Dd");
            assert_eq!(encode_text("item1 item2"), "item1%20item2");
            assert_eq!(encode_text("safe-._~"), "safe-._~");
            assert_eq!(encode_text("100%"), "100%25");
        }

        #[test]
        fn test_encode_text_utf8() {
            assert_eq!(encode_text("é"), "%C3%A9");
        }

        #[test]
        fn test_decode_text() {
            assert_eq!(decode_text("bad%20name"), "bad name");
            assert_eq!(decode_text("plain"), "plain");
            assert_eq!(decode_text("%C3%A9"), "é");
            assert_eq!(decode_text("a%2Cb"), "a,b");
        }
    }
}
