use sha2::{Digest, Sha256};

/// Pseudonyms for anonymous posts and comments. The name is a pure function
/// of (user, section): the same user keeps one identity inside a section but
/// cannot be correlated across sections.

const ADJECTIVES: [&str; 24] = [
    "Amber", "Brisk", "Calm", "Daring", "Eager", "Fleet", "Gentle", "Hazel", "Ivory", "Jolly",
    "Keen", "Lively", "Mellow", "Nimble", "Opal", "Plucky", "Quiet", "Rustic", "Silent", "Tidy",
    "Umber", "Vivid", "Witty", "Zesty",
];

const ANIMALS: [&str; 24] = [
    "Antelope", "Badger", "Crane", "Dolphin", "Egret", "Falcon", "Gazelle", "Heron", "Ibis",
    "Jackal", "Kestrel", "Lynx", "Marten", "Narwhal", "Otter", "Puffin", "Quail", "Raven",
    "Swift", "Tapir", "Urchin", "Vole", "Wren", "Yak",
];

/// Derive the stable display name for a user inside a section.
pub fn pseudonym(user_sys_id: i64, section_id: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}|{}", user_sys_id, section_id).as_bytes());
    let digest = hasher.finalize();

    let adjective = ADJECTIVES[digest[0] as usize % ADJECTIVES.len()];
    let animal = ANIMALS[digest[1] as usize % ANIMALS.len()];
    let suffix = u16::from_be_bytes([digest[2], digest[3]]) % 100;

    format!("{} {} {:02}", adjective, animal, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_per_user_and_section() {
        assert_eq!(pseudonym(42, 7), pseudonym(42, 7));
    }

    #[test]
    fn varies_across_sections_and_users() {
        // Not guaranteed distinct for every pair, but these must not all collide
        let names = [
            pseudonym(42, 7),
            pseudonym(42, 8),
            pseudonym(43, 7),
            pseudonym(44, 9),
        ];
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert!(unique.len() > 1);
    }

    #[test]
    fn shape_is_adjective_animal_two_digits() {
        let name = pseudonym(1, 1);
        let parts: Vec<&str> = name.split(' ').collect();
        assert_eq!(parts.len(), 3);
        assert!(ADJECTIVES.contains(&parts[0]));
        assert!(ANIMALS.contains(&parts[1]));
        assert_eq!(parts[2].len(), 2);
        assert!(parts[2].chars().all(|c| c.is_ascii_digit()));
    }
}
