// src/outcome.rs
//! Result of one strategy in an ordered fallback chain.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum Outcome<T> {
    /// The strategy produced a value; the chain stops here.
    Ok(T),
    /// Not applicable or failed softly; the next strategy runs.
    Fallback(String),
    /// Failed and nothing further should be tried.
    Fail(String),
}

impl<T> Outcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Ok(_) => None,
            Outcome::Fallback(r) | Outcome::Fail(r) => Some(r),
        }
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Outcome::Ok(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors() {
        let a: Outcome<u8> = Outcome::Ok(1);
        assert!(a.is_ok());
        assert_eq!(a.reason(), None);
        let b: Outcome<u8> = Outcome::Fallback("timeout".into());
        assert_eq!(b.reason(), Some("timeout"));
        assert_eq!(b.ok(), None);
        let json = serde_json::to_value(Outcome::<u8>::Fail("x".into())).unwrap();
        assert_eq!(json["outcome"], "fail");
    }
}
