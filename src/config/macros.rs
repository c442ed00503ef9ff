/// Configuration macros for zero-repetition config definitions
///
/// `config_struct!` defines a configuration struct with embedded defaults in a
/// single declaration: field name, type and default value sit together, and
/// the macro generates the struct, its `Default` impl and serde support with
/// `#[serde(default)]` so partial TOML files fill in the rest.
///
/// # Example
/// ```ignore
/// config_struct! {
///     pub struct PoolConfig {
///         max_cached_intervals: usize = 960,
///         save_debounce_ms: u64 = 10_000,
///     }
/// }
/// ```
#[macro_export]
macro_rules! config_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_name:ident: $field_type:ty = $default_value:expr
            ),*
            $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        #[serde(default)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field_name: $field_type,
            )*
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $(
                        $field_name: $default_value,
                    )*
                }
            }
        }
    };
}
