//! Property-based test generators using proptest.

use proptest::prelude::*;

/// Strategy for generating valid peer names.
pub fn peer_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][A-Za-z0-9_-]{0,63}").expect("Invalid regex")
}

/// Strategy for generating names every peer-name validator must reject.
pub fn invalid_peer_name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        // Leading digit, underscore or dash.
        prop::string::string_regex("[0-9_-][A-Za-z0-9_-]{0,20}").expect("Invalid regex"),
        // Forbidden character somewhere after the first letter.
        prop::string::string_regex("[A-Za-z][A-Za-z0-9]{0,10}[;/ .$`'\"|&][A-Za-z0-9]{0,10}")
            .expect("Invalid regex"),
        // Too long.
        prop::string::string_regex("[A-Za-z][A-Za-z0-9_-]{64,80}").expect("Invalid regex"),
    ]
}

/// Strategy for generating non-empty passwords.
pub fn password_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[ -~]{1,48}").expect("Invalid regex")
}

/// Strategy for generating row values.
pub fn row_value_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9 ]{1,16}").expect("Invalid regex")
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn peer_names_start_with_letter(name in peer_name_strategy()) {
            prop_assert!(name.chars().next().is_some_and(|c| c.is_ascii_alphabetic()));
            prop_assert!(name.len() <= 64);
        }

        #[test]
        fn passwords_are_not_empty(password in password_strategy()) {
            prop_assert!(!password.is_empty());
        }
    }
}
