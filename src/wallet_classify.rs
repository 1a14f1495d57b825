use alloy_primitives::Address;

/// Surface-level fingerprint of a wallet address, derived purely from its
/// hex representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletClassification {
    pub character_ratio: String,
    pub prefix: String,
    pub density: String,
    pub letter_range: String,
    pub position: String,
}

pub fn classify(address: &Address) -> WalletClassification {
    let hex = hex_digits(address);

    WalletClassification {
        character_ratio: classify_by_character_ratio(&hex),
        prefix: format!("P-{}", &hex[..4]),
        density: classify_by_density(&hex),
        letter_range: classify_by_letter_range(&hex),
        position: classify_by_position(&hex),
    }
}

fn hex_digits(address: &Address) -> String {
    format!("{address:?}")
        .trim_start_matches("0x")
        .to_string()
}

fn classify_by_character_ratio(hex: &str) -> String {
    let total = hex.len() as f64;
    let letters = hex.chars().filter(char::is_ascii_alphabetic).count() as f64;
    let numbers = hex.chars().filter(char::is_ascii_digit).count() as f64;
    format!(
        "L-{:.2}-N-{:.2}",
        letters / total * 100.0,
        numbers / total * 100.0
    )
}

fn classify_by_density(hex: &str) -> String {
    let letters = hex.chars().filter(char::is_ascii_alphabetic).count();
    let numbers = hex.chars().filter(char::is_ascii_digit).count();
    if letters > numbers {
        "LD".to_string()
    } else if numbers > letters {
        "ND".to_string()
    } else {
        "BD".to_string()
    }
}

fn classify_by_letter_range(hex: &str) -> String {
    let a_to_c = hex.chars().filter(|c| ('a'..='c').contains(c)).count();
    let d_to_f = hex.chars().filter(|c| ('d'..='f').contains(c)).count();
    format!("A-C-{a_to_c}-D-F-{d_to_f}")
}

fn classify_by_position(hex: &str) -> String {
    let prefix_letters = hex
        .chars()
        .take(4)
        .filter(char::is_ascii_alphabetic)
        .count();
    let suffix_numbers = hex
        .chars()
        .rev()
        .take(4)
        .filter(char::is_ascii_digit)
        .count();
    format!("PL-{prefix_letters}-SN-{suffix_numbers}")
}
