use super::*;

#[test]
fn write_read() {
    let path = "test.ic";

    let code = vec![30, 27, 34, 50, 91, 83, 49, 5, 6, 134, 61, 2, 6, 239, 34, 8, 15];

    write_file(path, &code).unwrap();
    let code_read = read_file(path).unwrap();

    assert_eq!(code, code_read);

    std::fs::remove_file(path).unwrap();
}

#[test]
fn round_trip_empty() {
    let mut buf = Vec::new();
    write(&mut buf, &[]).unwrap();
    assert_eq!(read(&buf[..]).unwrap(), Vec::<Word>::new());
}

#[test]
fn skips_blank_lines() {
    let code = read(&b"1\n\n2\n\n\n3\n"[..]).unwrap();
    assert_eq!(code, vec![1, 2, 3]);
}

#[test]
fn rejects_non_integer_line() {
    match read(&b"1\n2\nnope\n3\n"[..]) {
        Err(ReadError::MalformedLine { line, text }) => {
            assert_eq!(line, 3);
            assert_eq!(text, "nope");
        }
        other => panic!("expected a malformed-line error, got {:?}", other),
    }
}
