//! Binary frame vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use bytes::Bytes;

use wsmux_core::protocol::binary::{decode_binary, encode_binary};
use wsmux_core::Kind;

use vector_loader::load;

#[test]
fn binary_vectors() {
    let files = [
        "bin_upload.json",
        "bin_numeric_topic.json",
        "bin_empty_payload.json",
        "bin_truncated_header.json",
        "bin_too_short.json",
        "bin_bad_utf8.json",
        "bin_bad_json.json",
    ];

    for f in files {
        let v = load(f);
        let raw = v.frame.decode();
        let res = decode_binary(Bytes::from(raw));

        if let Some(err) = v.expect_error {
            let e = res.expect_err("expected error");
            assert_eq!(e.code().as_str(), err.code, "vector={}", v.description);
            continue;
        }

        let env = res.expect("expected ok envelope");
        let ex = v.expect.expect("missing expect block");

        assert_eq!(env.kind(), Kind::Binary, "vector={}", v.description);
        assert_eq!(env.channel, ex["channel"].as_str().unwrap(), "vector={}", v.description);
        assert_eq!(env.topic, ex["topic"].as_str().unwrap(), "vector={}", v.description);
        assert_eq!(env.parse_data(), ex["data"], "vector={}", v.description);

        if let Some(seq) = ex.get("sequence") {
            assert_eq!(env.sequence, seq.as_u64(), "vector={}", v.description);
        }

        let payload = env.binary.as_deref().unwrap();
        assert_eq!(hex::encode(payload), ex["binary_hex"].as_str().unwrap(), "vector={}", v.description);
    }
}

#[test]
fn reencoded_vector_decodes_identically() {
    let v = load("bin_upload.json");
    let env = decode_binary(Bytes::from(v.frame.decode())).unwrap();

    let again = decode_binary(encode_binary(&env).unwrap()).unwrap();
    assert_eq!(again, env);
}
