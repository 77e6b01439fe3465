use std::sync::{LazyLock, Mutex};

use rustc_hash::FxHashMap as HashMap;

/// One counter per key, kept for the life of the process so names never repeat. Each layer
/// that creates parameters adds its `{full_name}.w`/`.b` keys; nothing is evicted.
static COUNTERS: LazyLock<Mutex<HashMap<String, usize>>> = LazyLock::new(Default::default);

/// Returns `"{key}_{n}"` where `n` counts previous calls with the same key, process-wide.
pub fn generate(key: &str) -> String {
    let mut counters = COUNTERS.lock().expect("failed to lock");
    let counter = counters.entry(key.to_owned()).or_default();
    let name = format!("{key}_{counter}");
    *counter += 1;
    name
}

/// Converts a camel-case type name to snake case: `BufferNet` becomes `buffer_net`,
/// `MLPBlock` becomes `mlp_block`.
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut output = String::with_capacity(name.len() + 4);
    for (index, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && index > 0 {
            let prev = chars[index - 1];
            let next_lower = chars.get(index + 1).is_some_and(|next| next.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (next_lower && prev != '_') {
                output.push('_');
            }
        }
        output.extend(c.to_lowercase());
    }
    output
}

/// Derives a name scope from a type: the last path segment, generics stripped, snake-cased.
pub fn type_scope<T: ?Sized>() -> String {
    let name = std::any::type_name::<T>();
    let name = name.split('<').next().unwrap_or(name);
    let name = name.rsplit("::").next().unwrap_or(name);
    snake_case(name)
}

#[cfg(test)]
mod tests {
    use super::{generate, snake_case, type_scope};

    #[test]
    fn test_generate_counts_per_key() {
        let key = "unique_test_key";
        assert_eq!(generate(key), "unique_test_key_0");
        assert_eq!(generate(key), "unique_test_key_1");
        assert_eq!(generate("unique_test_other"), "unique_test_other_0");
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("BufferNet"), "buffer_net");
        assert_eq!(snake_case("L1"), "l1");
        assert_eq!(snake_case("MLPBlock"), "mlp_block");
        assert_eq!(snake_case("Conv2DTranspose"), "conv2_d_transpose");
        assert_eq!(snake_case("layer"), "layer");
    }

    #[test]
    fn test_type_scope() {
        struct BufferNet;
        struct Wrapper<T>(T);
        assert_eq!(type_scope::<BufferNet>(), "buffer_net");
        assert_eq!(type_scope::<Wrapper<BufferNet>>(), "wrapper");
    }
}
