//! Property-based checks of naming and runtime validation.

use chrono::{TimeZone, Utc};
use fnbox::error::ErrorKind;
use fnbox::runtime::{self, Runtime};
use proptest::prelude::*;

proptest! {
    #[test]
    fn artifact_filename_is_pure(
        module in "[a-z][a-z0-9_]{0,15}",
        function in "[a-z][a-z0-9_]{0,15}",
        millis in 0i64..4_000_000_000_000,
    ) {
        let handler = format!("{}.{}", module, function);
        let created_at = Utc.timestamp_millis_opt(millis).unwrap();

        let first = runtime::artifact_filename(&handler, Runtime::Python, created_at);
        let second = runtime::artifact_filename(&handler, Runtime::Python, created_at);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first, format!("{}_{}.py", millis, module));
        prop_assert_eq!(
            runtime::remote_filename(&handler, Runtime::Python),
            format!("{}.py", module)
        );
    }

    #[test]
    fn unknown_runtimes_are_rejected(id in "[a-zA-Z0-9.]{1,12}") {
        prop_assume!(id != "python");

        let err = id.parse::<Runtime>().unwrap_err();
        prop_assert_eq!(err.kind, ErrorKind::UnsupportedRuntime);
        prop_assert_eq!(err.message, format!("Unsupported runtime for execution agent: {}", id));
    }

    #[test]
    fn quoted_handlers_stay_one_shell_word(handler in "[ -~]{0,32}") {
        let quoted = runtime::shell_quote(&handler);
        prop_assert!(quoted.starts_with('\''));
        prop_assert!(quoted.ends_with('\''));
        prop_assert_eq!(quoted.replace(r"'\''", "'"), format!("'{}'", handler));
    }
}
