//! Shell-style wildcard matching for release asset names
//!
//! `*` matches any run of characters (including none) and `?` matches
//! exactly one character. Everything else matches literally.

/// Check whether `name` matches `pattern`
pub fn matches(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();

    let (mut p, mut n) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while n < name.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, n));
                p += 1;
            }
            Some(&c) if c == '?' || c == name[n] => {
                p += 1;
                n += 1;
            }
            _ => match backtrack {
                // Let the last star swallow one more character
                Some((star, consumed)) => {
                    p = star + 1;
                    n = consumed + 1;
                    backtrack = Some((star, consumed + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal() {
        assert!(matches("app.AppImage.zsync", "app.AppImage.zsync"));
        assert!(!matches("app.AppImage.zsync", "app.AppImage"));
    }

    #[test]
    fn test_star() {
        assert!(matches("appimagetool-*-x86_64.AppImage.zsync", "appimagetool-13-x86_64.AppImage.zsync"));
        assert!(matches("*.zsync", ".zsync"));
        assert!(matches("*", ""));
        assert!(!matches("*-x86_64.AppImage.zsync", "app-i686.AppImage.zsync"));
    }

    #[test]
    fn test_question_mark() {
        assert!(matches("app-v?.zsync", "app-v2.zsync"));
        assert!(!matches("app-v?.zsync", "app-v10.zsync"));
    }

    #[test]
    fn test_backtracking() {
        assert!(matches("a*b*c", "aXbYbZc"));
        assert!(matches("*ab", "aab"));
        assert!(!matches("a*b", "aXbY"));
    }
}
