//! Error handling helpers and primitives.

use anyhow::Error;

/// Renders an error and its full causal chain as a single colon-joined string,
/// e.g. `"outer: middle: root"`. Used for log lines and response `error` fields
/// where a stack trace would be noise but the cause chain matters.
pub fn chain(res: Error) -> String {
    res.chain()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    #[test]
    fn chain() {
        let first = anyhow!("error 1");
        let second = anyhow!("error 2");

        let res = super::chain(first.context(second));

        assert_eq!(res, "error 2: error 1");
    }
}
