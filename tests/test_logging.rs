//! Log format and level parsing

use printago_connector::observability::logging::{parse_level, LogFormat};
use tracing::Level;

#[test]
fn test_log_format_parse_is_case_insensitive() {
    assert_eq!(LogFormat::parse("json"), LogFormat::Json);
    assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("Compact"), LogFormat::Compact);
}

#[test]
fn test_unknown_log_format_falls_back_to_json() {
    for value in ["", "xml", "  pretty  ", "123"] {
        assert_eq!(LogFormat::parse(value), LogFormat::Json, "{value:?}");
    }
}

#[test]
fn test_log_level_parsing() {
    assert_eq!(parse_level("error"), Level::ERROR);
    assert_eq!(parse_level("WARN"), Level::WARN);
    assert_eq!(parse_level("Debug"), Level::DEBUG);
    assert_eq!(parse_level("trace"), Level::TRACE);
    assert_eq!(parse_level("verbose"), Level::INFO);
}

#[test]
fn test_init_logging_twice_is_harmless() {
    printago_connector::observability::init_logging(Level::INFO, LogFormat::Compact, false);
    printago_connector::observability::init_logging(Level::DEBUG, LogFormat::Json, true);
}
