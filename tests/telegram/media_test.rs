//! Filename sanitization.

use ferry::telegram::media::sanitize_filename;

#[test]
fn plain_name_is_kept() {
    assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
}

#[test]
fn path_separators_are_replaced() {
    assert_eq!(sanitize_filename("../../etc/passwd"), "_.._etc_passwd");
    assert_eq!(sanitize_filename("a\\b.txt"), "a_b.txt");
}

#[test]
fn leading_dots_are_stripped() {
    assert_eq!(sanitize_filename(".hidden"), "hidden");
}

#[test]
fn empty_name_gets_fallback() {
    let name = sanitize_filename("  ");
    assert!(name.starts_with("file_"), "got: {name}");
}
