//! Text for caught panics.

use std::any::Any;

/// What a caught panic said.
///
/// `panic!` payloads are a `&'static str` or a `String` and come back as-is.
/// `std::panic::panic_any` can carry anything else, which has no text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    match payload.downcast_ref::<&'static str>() {
        Some(message) => (*message).to_owned(),
        None => match payload.downcast_ref::<String>() {
            Some(message) => message.clone(),
            None => "non-string panic payload".to_owned(),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::panic;

    use super::*;

    #[test]
    fn panic_macro_messages_come_back_verbatim() {
        let literal = panic::catch_unwind(|| panic!("boom")).expect_err("panicked");
        let formatted = panic::catch_unwind(|| panic!("row {} missing", 7)).expect_err("panicked");

        assert_eq!(panic_message(&*literal), "boom");
        assert_eq!(panic_message(&*formatted), "row 7 missing");
    }

    #[test]
    fn other_payloads_get_a_placeholder() {
        let payload = panic::catch_unwind(|| panic::panic_any(42_u32)).expect_err("panicked");
        assert_eq!(panic_message(&*payload), "non-string panic payload");
    }
}
