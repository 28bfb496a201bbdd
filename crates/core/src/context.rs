//! Conversation context and its topic-list encoding.
//!
//! The context is the only state carried between turns. It is persisted
//! externally as an ordered list of `key:value` strings (the "topic list").
//! Packing emits keys in a fixed order; unpacking is tolerant and never fails.

use serde::{Deserialize, Serialize};

const CONTACT_ID: &str = "contactId";
const PHONE_ID: &str = "phoneId";
const COMPANY_NAME: &str = "companyName";
const LAST_FOLLOW_UP: &str = "lastFollowUp";
const NEXT_FOLLOW_UP: &str = "nextFollowUp";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationContext {
    pub contact_id: Option<String>,
    pub phone_id: Option<String>,
    pub company_name: Option<String>,
    pub last_follow_up: Option<String>,
    pub next_follow_up: Option<String>,
}

impl ConversationContext {
    pub fn is_empty(&self) -> bool {
        self.entries().iter().all(|(_, value)| present(*value).is_none())
    }

    /// Encodes the context as a topic list. Returns `None` when no key is set.
    pub fn pack(&self) -> Option<Vec<String>> {
        let packed = self
            .entries()
            .into_iter()
            .filter_map(|(key, value)| present(value).map(|value| format!("{key}:{value}")))
            .collect::<Vec<_>>();

        if packed.is_empty() {
            None
        } else {
            Some(packed)
        }
    }

    /// Decodes a topic list. Malformed and unrecognized entries are dropped;
    /// the last occurrence of a repeated key wins.
    pub fn unpack<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut context = Self::default();
        for entry in entries {
            let Some((key, value)) = entry.as_ref().split_once(':') else {
                continue;
            };
            let Some(value) = present(Some(value.trim())) else {
                continue;
            };
            let value = Some(value.to_string());
            match key.trim() {
                CONTACT_ID => context.contact_id = value,
                PHONE_ID => context.phone_id = value,
                COMPANY_NAME => context.company_name = value,
                LAST_FOLLOW_UP => context.last_follow_up = value,
                NEXT_FOLLOW_UP => context.next_follow_up = value,
                _ => {}
            }
        }
        context
    }

    /// Records a freshly asked follow-up question. The previously pending one
    /// becomes `last_follow_up`.
    pub fn advance_follow_up(&mut self, question: Option<String>) {
        if let Some(pending) = self.next_follow_up.take() {
            self.last_follow_up = Some(pending);
        }
        self.next_follow_up = question.filter(|value| !value.trim().is_empty());
    }

    fn entries(&self) -> [(&'static str, Option<&str>); 5] {
        [
            (CONTACT_ID, self.contact_id.as_deref()),
            (PHONE_ID, self.phone_id.as_deref()),
            (COMPANY_NAME, self.company_name.as_deref()),
            (LAST_FOLLOW_UP, self.last_follow_up.as_deref()),
            (NEXT_FOLLOW_UP, self.next_follow_up.as_deref()),
        ]
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::ConversationContext;

    fn full_context() -> ConversationContext {
        ConversationContext {
            contact_id: Some("C1".to_string()),
            phone_id: Some("P7".to_string()),
            company_name: Some("Acme Roofing".to_string()),
            last_follow_up: Some("Would you like to see open tasks?".to_string()),
            next_follow_up: Some("Would you like to see a 30-day call and SMS report?".to_string()),
        }
    }

    #[test]
    fn pack_emits_keys_in_fixed_order() {
        let packed = full_context().pack().expect("context has keys");
        let keys = packed
            .iter()
            .map(|entry| entry.split_once(':').map(|(key, _)| key).unwrap_or_default())
            .collect::<Vec<_>>();

        assert_eq!(
            keys,
            vec!["contactId", "phoneId", "companyName", "lastFollowUp", "nextFollowUp"]
        );
    }

    #[test]
    fn pack_skips_absent_keys_and_returns_none_when_empty() {
        let context = ConversationContext {
            company_name: Some("Acme".to_string()),
            ..ConversationContext::default()
        };
        assert_eq!(context.pack(), Some(vec!["companyName:Acme".to_string()]));
        assert_eq!(ConversationContext::default().pack(), None);
        assert!(ConversationContext::default().is_empty());
    }

    #[test]
    fn every_subset_of_known_keys_round_trips() {
        let full = full_context();
        for mask in 0u8..32 {
            let context = ConversationContext {
                contact_id: full.contact_id.clone().filter(|_| mask & 1 != 0),
                phone_id: full.phone_id.clone().filter(|_| mask & 2 != 0),
                company_name: full.company_name.clone().filter(|_| mask & 4 != 0),
                last_follow_up: full.last_follow_up.clone().filter(|_| mask & 8 != 0),
                next_follow_up: full.next_follow_up.clone().filter(|_| mask & 16 != 0),
            };
            let packed = context.pack().unwrap_or_default();
            assert_eq!(ConversationContext::unpack(&packed), context, "mask {mask}");
        }
    }

    #[test]
    fn unpack_is_order_independent_and_keeps_colons_in_values() {
        let context = ConversationContext::unpack([
            "nextFollowUp:Reminder: want the 7-day report?",
            "contactId:C1",
        ]);
        assert_eq!(context.contact_id.as_deref(), Some("C1"));
        assert_eq!(context.next_follow_up.as_deref(), Some("Reminder: want the 7-day report?"));
    }

    #[test]
    fn unpack_drops_malformed_and_unknown_entries() {
        let context = ConversationContext::unpack([
            "garbage",
            "favoriteColor:blue",
            "phoneId:",
            ":orphan",
            "contactId:C2",
        ]);
        assert_eq!(
            context,
            ConversationContext { contact_id: Some("C2".to_string()), ..Default::default() }
        );
    }

    #[test]
    fn advance_moves_pending_question_into_last() {
        let mut context = ConversationContext {
            next_follow_up: Some("Want the weekly report?".to_string()),
            ..ConversationContext::default()
        };
        context.advance_follow_up(Some("Want to see page 2?".to_string()));
        assert_eq!(context.last_follow_up.as_deref(), Some("Want the weekly report?"));
        assert_eq!(context.next_follow_up.as_deref(), Some("Want to see page 2?"));

        context.advance_follow_up(None);
        assert_eq!(context.last_follow_up.as_deref(), Some("Want to see page 2?"));
        assert_eq!(context.next_follow_up, None);
    }
}
