//! Key combo parsing for `press` steps ("Enter", "Control+a", "Shift+Tab").

/// CDP modifier bit flags.
pub const ALT: i64 = 1;
pub const CTRL: i64 = 2;
pub const META: i64 = 4;
pub const SHIFT: i64 = 8;

/// A single key press as dispatched through `Input.dispatchKeyEvent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStroke {
    pub key: String,
    /// Physical key code, empty when unknown.
    pub code: String,
    /// Windows virtual key code, `0` when unknown.
    pub key_code: i64,
    pub modifiers: i64,
    /// Text inserted by the key, for printable characters.
    pub text: Option<String>,
}

impl KeyStroke {
    pub fn parse(combo: &str) -> Self {
        let (modifiers, name) = split_modifiers(combo);
        let (key, code, key_code) = named_key(name);
        let text = match key.as_str() {
            "Enter" => Some("\r".to_string()),
            k if k.chars().count() == 1 && modifiers & (CTRL | META | ALT) == 0 => {
                Some(k.to_string())
            }
            _ => None,
        };
        Self {
            key,
            code,
            key_code,
            modifiers,
            text,
        }
    }
}

fn split_modifiers(combo: &str) -> (i64, &str) {
    // "+" alone, or a trailing "+", means the plus key itself.
    if combo == "+" {
        return (0, "+");
    }
    let (prefix, key) = match combo.rsplit_once('+') {
        Some((prefix, "")) => (prefix.trim_end_matches('+'), "+"),
        Some((prefix, key)) => (prefix, key),
        None => return (0, combo),
    };

    let modifiers = prefix
        .split('+')
        .map(|part| match part.to_ascii_lowercase().as_str() {
            "alt" | "option" => ALT,
            "ctrl" | "control" => CTRL,
            "meta" | "cmd" | "command" => META,
            "shift" => SHIFT,
            _ => 0,
        })
        .fold(0, |acc, bit| acc | bit);

    (modifiers, key)
}

fn named_key(name: &str) -> (String, String, i64) {
    let fixed = |key: &str, code: i64| (key.to_string(), key.to_string(), code);
    match name {
        "Enter" | "Return" => fixed("Enter", 13),
        "Tab" => fixed("Tab", 9),
        "Escape" | "Esc" => fixed("Escape", 27),
        "Backspace" => fixed("Backspace", 8),
        "Delete" => fixed("Delete", 46),
        "Space" | " " => (" ".into(), "Space".into(), 32),
        "ArrowUp" => fixed("ArrowUp", 38),
        "ArrowDown" => fixed("ArrowDown", 40),
        "ArrowLeft" => fixed("ArrowLeft", 37),
        "ArrowRight" => fixed("ArrowRight", 39),
        "Home" => fixed("Home", 36),
        "End" => fixed("End", 35),
        "PageUp" => fixed("PageUp", 33),
        "PageDown" => fixed("PageDown", 34),
        f if f.len() >= 2 && f.starts_with('F') && f[1..].parse::<i64>().is_ok() => {
            let n: i64 = f[1..].parse().unwrap_or(0);
            if (1..=12).contains(&n) {
                fixed(f, 111 + n)
            } else {
                (f.to_string(), String::new(), 0)
            }
        }
        c if c.chars().count() == 1 => {
            let ch = c.chars().next().unwrap_or_default();
            if ch.is_ascii_alphabetic() {
                let upper = ch.to_ascii_uppercase();
                (c.to_string(), format!("Key{}", upper), upper as i64)
            } else if ch.is_ascii_digit() {
                (c.to_string(), format!("Digit{}", ch), ch as i64)
            } else {
                (c.to_string(), String::new(), 0)
            }
        }
        other => (other.to_string(), String::new(), 0),
    }
}
