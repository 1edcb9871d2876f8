//! Generate framed test vectors for client interop testing.
//!
//! Run with: cargo run --package protocol --example test_vectors

use protocol::messages::*;
use protocol::FrameCodec;

fn main() {
    let codec = FrameCodec::new();

    print_test_vector(
        &codec,
        "bind_single_tenant",
        &Envelope::new(1, Message::Bind(Bind { identity: None })),
    );

    print_test_vector(
        &codec,
        "list_root",
        &Envelope::new(
            2,
            Message::FileListRequest(FileListRequest {
                path: String::new(),
            }),
        ),
    );

    print_test_vector(
        &codec,
        "upload_nested",
        &Envelope::new(
            3,
            Message::FileUploadBatch(FileUploadBatch {
                path: "Documents".to_string(),
                items: vec![UploadPayload {
                    name: "sub/dir/file.txt".to_string(),
                    data: b"hello".to_vec(),
                }],
            }),
        ),
    );

    print_test_vector(
        &codec,
        "error_path_escape",
        &Envelope::new(
            4,
            Message::Error(ErrorMessage {
                code: ErrorCode::PathEscape,
                message: "path escapes storage root: ../etc".to_string(),
                context: Some("../etc".to_string()),
                recoverable: false,
            }),
        ),
    );
}

fn print_test_vector(codec: &FrameCodec, name: &str, envelope: &Envelope) {
    let bytes = codec
        .encode_envelope(envelope)
        .expect("serialization failed");
    let rendered: Vec<String> = bytes.iter().map(|b| b.to_string()).collect();
    println!(
        "export const {} = new Uint8Array([{}]);",
        name,
        rendered.join(", ")
    );
}
