use crate::ids::ClientId;

/// Greedy, longest-name-first mention resolution (spec §4.3 "Key algorithms").
/// `roster` must already be sorted by descending username length so two names
/// where one is a prefix of the other resolve to the longer one. The caller
/// passes the same roster snapshot to every recipient's broadcast so mention
/// resolution is identical for everyone who sees the message.
pub fn resolve_mentions(text: &str, roster: &[(ClientId, &str)]) -> Vec<ClientId> {
    let mut found = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for (start, _) in text.match_indices('@') {
        let rest = &text[start + 1..];
        for (id, name) in roster {
            if seen.contains(id) {
                continue;
            }
            if rest.starts_with(name) {
                found.push(*id);
                seen.insert(*id);
                break;
            }
        }
    }

    found
}

/// Sorts a roster snapshot by descending display-name length, the order
/// `resolve_mentions` requires.
pub fn sort_roster_for_mentions(roster: &mut [(ClientId, &str)]) {
    roster.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_name_wins_on_prefix_collision() {
        let mut roster = vec![(ClientId(1), "Al"), (ClientId(2), "Alice")];
        sort_roster_for_mentions(&mut roster);
        let mentions = resolve_mentions("hi @Alice", &roster);
        assert_eq!(mentions, vec![ClientId(2)]);
    }

    #[test]
    fn dedups_repeated_mentions() {
        let roster = vec![(ClientId(1), "Bob")];
        let mentions = resolve_mentions("@Bob are you there @Bob?", &roster);
        assert_eq!(mentions, vec![ClientId(1)]);
    }

    #[test]
    fn no_match_yields_empty() {
        let roster = vec![(ClientId(1), "Bob")];
        assert!(resolve_mentions("no mentions here", &roster).is_empty());
    }
}
