/// Replaces every `$NAME` in `word` with the matching environment variable,
/// or with nothing when the variable is unset.
pub fn expand(word: &str) -> String {
    expand_with(word, |name| {
        std::env::var_os(name).map(|value| value.to_string_lossy().into_owned())
    })
}

/// Same as [`expand`] with a caller-supplied variable lookup.
///
/// A name is a run of ascii alphanumerics and underscores. A `$` that is not
/// followed by a name expands to nothing.
pub fn expand_with<F>(word: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if !word.contains('$') {
        return word.to_owned();
    }

    let mut res = String::with_capacity(word.len());
    let mut rest = word;

    while let Some(start) = rest.find('$') {
        res.push_str(&rest[..start]);

        let after = &rest[start + 1..];
        let len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        let name = &after[..len];

        if !name.is_empty() {
            if let Some(value) = lookup(name) {
                res.push_str(&value);
            }
        }

        rest = &after[len..];
    }

    res.push_str(rest);
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str) -> Option<String> {
        match name {
            "HOME" => Some("/home/ada".into()),
            "USER_1" => Some("ada".into()),
            _ => None,
        }
    }

    #[test]
    fn plain_words_are_untouched() {
        assert_eq!(expand_with("hello", env), "hello");
    }

    #[test]
    fn variables_are_substituted_in_place() {
        assert_eq!(expand_with("$HOME/src", env), "/home/ada/src");
        assert_eq!(expand_with("id=$USER_1.", env), "id=ada.");
        assert_eq!(expand_with("$HOME$USER_1", env), "/home/adaada");
    }

    #[test]
    fn unset_variables_expand_to_nothing() {
        assert_eq!(expand_with("a${MISSING}b", env), "a{MISSING}b");
        assert_eq!(expand_with("a$MISSING-b", env), "a-b");
    }

    #[test]
    fn bare_dollar_is_dropped() {
        assert_eq!(expand_with("cost: $", env), "cost: ");
        assert_eq!(expand_with("$-x", env), "-x");
    }
}
