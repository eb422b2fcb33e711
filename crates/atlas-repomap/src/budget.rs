/// Counts tokens in rendered map text.
///
/// Implement this to plug in a model-specific tokenizer.
pub trait TokenCounter: Send + Sync {
    /// Number of tokens `text` occupies.
    fn count(&self, text: &str) -> usize;
}

/// Estimates one token per four characters, rounded up.
///
/// # Examples
///
/// ```
/// use atlas_repomap::budget::{ApproxTokenCounter, TokenCounter};
///
/// assert_eq!(ApproxTokenCounter.count(""), 0);
/// assert_eq!(ApproxTokenCounter.count("abcd"), 1);
/// assert_eq!(ApproxTokenCounter.count("abcde"), 2);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproxTokenCounter;

impl TokenCounter for ApproxTokenCounter {
    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

/// Find the longest prefix of a ranked list whose rendering fits `budget`.
///
/// Binary-searches the prefix length, starting at `min(budget / 25, len)`,
/// calling `render(n)` for a prefix of `n` items. Returns the rendering with
/// the most tokens that is still `<= budget`, or an empty string when none
/// fits (including `budget == 0`).
///
/// # Examples
///
/// ```
/// use atlas_repomap::budget::{fit_to_budget, ApproxTokenCounter};
///
/// let words = ["alpha ", "beta ", "gamma ", "delta "];
/// let text = fit_to_budget(words.len(), 4, &ApproxTokenCounter, |n| words[..n].concat());
/// assert_eq!(text, "alpha beta ");
/// ```
pub fn fit_to_budget<F>(
    len: usize,
    budget: usize,
    counter: &dyn TokenCounter,
    mut render: F,
) -> String
where
    F: FnMut(usize) -> String,
{
    if budget == 0 || len == 0 {
        return String::new();
    }

    let mut lower = 0;
    let mut upper = len;
    let mut middle = (budget / 25).min(len);
    let mut best = String::new();
    let mut best_tokens = 0;

    while lower <= upper {
        let text = render(middle);
        let tokens = counter.count(&text);

        if tokens <= budget && tokens > best_tokens {
            best = text;
            best_tokens = tokens;
        }

        if tokens < budget {
            lower = middle + 1;
        } else if middle == 0 {
            break;
        } else {
            upper = middle - 1;
        }
        middle = (lower + upper) / 2;
    }

    tracing::debug!(budget, tokens = best_tokens, "fitted map to budget");
    best
}
