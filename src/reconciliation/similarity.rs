//! Name similarity for matching bank memos to entity names
//!
//! Scores run from 0.0 (nothing in common) to 1.0 (identical after folding).

/// Lowercase and strip the diacritics used in Portuguese and Spanish names
pub fn fold(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            'ñ' => 'n',
            'ý' | 'ÿ' => 'y',
            other => other,
        })
        .collect()
}

/// Folded alphanumeric tokens
pub fn tokens(text: &str) -> Vec<String> {
    fold(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(String::from)
        .collect()
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            let cost = usize::from(ca != cb);
            row[j + 1] = (above + 1).min(row[j] + 1).min(diagonal + cost);
            diagonal = above;
        }
    }
    row[b.len()]
}

/// `1 - distance / longer length` over two already folded strings
pub fn edit_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 0.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / longest as f64
}

/// How well `name` appears in `text`
///
/// Best of two measures: the edit ratio of the whole folded strings (catches
/// typos in short names), and the mean best-token ratio of every name word
/// against the words of `text` (catches a name embedded in a longer memo).
/// Name words of two characters or fewer ("da", "de") are ignored by the
/// token measure.
pub fn name_similarity(name: &str, text: &str) -> f64 {
    let name_tokens = tokens(name);
    let text_tokens = tokens(text);
    if name_tokens.is_empty() || text_tokens.is_empty() {
        return 0.0;
    }

    let whole = edit_ratio(&name_tokens.join(" "), &text_tokens.join(" "));

    let significant: Vec<&String> = name_tokens.iter().filter(|t| t.chars().count() > 2).collect();
    if significant.is_empty() {
        return whole;
    }
    let coverage = significant
        .iter()
        .map(|word| {
            text_tokens
                .iter()
                .map(|candidate| edit_ratio(word, candidate))
                .fold(0.0_f64, f64::max)
        })
        .sum::<f64>()
        / significant.len() as f64;

    whole.max(coverage).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_strips_accents() {
        assert_eq!(fold("João Conceição"), "joao conceicao");
        assert_eq!(tokens("PIX-RECEBIDO: José"), vec!["pix", "recebido", "jose"]);
    }

    #[test]
    fn test_edit_ratio() {
        assert!((edit_ratio("silva", "silva") - 1.0).abs() < 1e-10);
        assert!((edit_ratio("silva", "silvo") - 0.8).abs() < 1e-10);
        assert_eq!(edit_ratio("", ""), 0.0);
    }

    #[test]
    fn test_name_inside_memo() {
        let score = name_similarity("João da Silva", "PIX RECEBIDO JOAO SILVA 12/06");
        assert!((score - 1.0).abs() < 1e-10, "score {score}");
    }

    #[test]
    fn test_typo_still_close() {
        let score = name_similarity("Marcelo Ribeiro", "marcelo ribeir");
        assert!(score > 0.85, "score {score}");
    }

    #[test]
    fn test_unrelated_names() {
        let score = name_similarity("Marcelo Ribeiro", "PAGAMENTO FORNECEDOR LUZ");
        assert!(score < 0.6, "score {score}");
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(name_similarity("", "anything"), 0.0);
        assert_eq!(name_similarity("bob", ""), 0.0);
    }
}
