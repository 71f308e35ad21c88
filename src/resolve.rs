//! Listing text -> [`MemberRecord`].
//!
//! A member's listing entry is a list of text lines whose positions drift because
//! several lines are optional. The tokens are first laid onto fourteen canonical
//! slots one to one, then a fixed chain of corrections moves them back where they
//! belong. Each correction assumes the ones before it already ran, so the order
//! matters.

use chrono::NaiveDate;
use serde::Serialize;

use crate::record::{MemberRecord, Tenure};
use crate::NOT_AVAILABLE;

const ADMIN_MARKER: &str = "(Admin)";
const ACTIVE_MARKER: &str = "Active ";
const JOINED_MARKER: &str = "Joined ";
const RENEWS_MARKER: &str = "Renews";
const INVITED_MARKER: &str = "Invited by";
const FREE_MARKER: &str = "Free";
const CURRENCY_MARKER: &str = "$";
const MONTHLY_SUFFIX: &str = "/month";

/// One member's listing entry: non-empty, trimmed lines in display order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RawMemberBlock {
    tokens: Vec<String>,
}

impl RawMemberBlock {
    pub fn from_text(text: &str) -> Self {
        Self {
            tokens: text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Takes the tokens as given, blanks included.
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Second token, where the display name sits before any realignment.
    pub fn display_name(&self) -> Option<&str> {
        self.tokens.get(1).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Level,
    Name,
    Handle,
    Chat,
    Membership,
    Phrase,
    Activity,
    Joined,
    Value,
    Renews,
    Location,
    InvitedBy,
    InvitedByAlt,
    /// Overflow. Whatever ends up here is not part of the record.
    Other,
}

const SLOT_COUNT: usize = 14;

struct Slots([String; SLOT_COUNT]);

impl Slots {
    fn assign(tokens: &[String]) -> Self {
        Self(std::array::from_fn(|i| {
            tokens
                .get(i)
                .cloned()
                .unwrap_or_else(|| NOT_AVAILABLE.to_string())
        }))
    }

    fn get(&self, slot: Slot) -> &str {
        &self.0[slot as usize]
    }

    fn set(&mut self, slot: Slot, value: impl Into<String>) {
        self.0[slot as usize] = value.into();
    }

    fn take(&mut self, slot: Slot) -> String {
        std::mem::replace(&mut self.0[slot as usize], NOT_AVAILABLE.to_string())
    }

    fn swap(&mut self, a: Slot, b: Slot) {
        self.0.swap(a as usize, b as usize);
    }

    /// value <- renews <- location <- value.
    fn rotate_value_tail(&mut self) {
        self.0[Slot::Value as usize..=Slot::Location as usize].rotate_left(1);
    }

    /// Drops the token at `slot`; every later token moves one slot earlier.
    fn close_gap(&mut self, slot: Slot) {
        self.0[slot as usize..].rotate_left(1);
        self.0[Slot::Other as usize] = NOT_AVAILABLE.to_string();
    }

    /// Marks `slot` as missing; every token from `slot` on moves one slot later and
    /// the last one falls off.
    fn open_gap(&mut self, slot: Slot) {
        self.0[slot as usize..].rotate_right(1);
        self.0[slot as usize] = NOT_AVAILABLE.to_string();
    }
}

/// Record fields a resolution is expected to fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnresolvedField {
    Level,
    DisplayName,
    Handle,
    ActiveSince,
    JoinedOn,
    MembershipValue,
    Tenure,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(MemberRecord),
    PartiallyResolved(MemberRecord, Vec<UnresolvedField>),
}

impl Resolution {
    pub fn record(&self) -> &MemberRecord {
        match self {
            Resolution::Resolved(record) | Resolution::PartiallyResolved(record, _) => record,
        }
    }

    pub fn into_record(self) -> MemberRecord {
        match self {
            Resolution::Resolved(record) | Resolution::PartiallyResolved(record, _) => record,
        }
    }

    pub fn unresolved(&self) -> &[UnresolvedField] {
        match self {
            Resolution::Resolved(_) => &[],
            Resolution::PartiallyResolved(_, missing) => missing,
        }
    }
}

/// Realigns one listing entry into a record. Never fails: anything it can't place
/// stays [`NOT_AVAILABLE`] and is reported in the resolution.
pub fn resolve(block: &RawMemberBlock, today: NaiveDate) -> Resolution {
    let mut slots = Slots::assign(block.tokens());
    realign(&mut slots);
    let record = into_record(slots, today);

    let missing = unresolved_fields(&record);
    if missing.is_empty() {
        Resolution::Resolved(record)
    } else {
        Resolution::PartiallyResolved(record, missing)
    }
}

fn realign(slots: &mut Slots) {
    // An admin badge sits where the handle belongs and pushes everything after it
    // one slot right.
    if slots.get(Slot::Handle).starts_with(ADMIN_MARKER) {
        slots.close_gap(Slot::Handle);
    }

    // No phrase: the activity line moved up into its slot.
    if slots.get(Slot::Phrase).starts_with(ACTIVE_MARKER) {
        slots.open_gap(Slot::Phrase);
    } else if slots.get(Slot::Phrase).is_empty() {
        slots.set(Slot::Phrase, NOT_AVAILABLE);
    }

    // No recognizable value: the token in the value slot is something else. Rotate
    // it behind the renewal and location lines.
    if !is_money(slots.get(Slot::Value)) {
        slots.rotate_value_tail();
    }

    // Still no value and a renewal line ended up in location: the value was missing
    // outright. One more rotation puts renewal and location back in their slots.
    if !is_money(slots.get(Slot::Value)) && slots.get(Slot::Location).starts_with(RENEWS_MARKER)
    {
        slots.rotate_value_tail();
    }

    // A renewal line in location belongs one slot earlier.
    if slots.get(Slot::Location).starts_with(RENEWS_MARKER) {
        slots.swap(Slot::Renews, Slot::Location);
    }

    if slots.get(Slot::Location).starts_with(INVITED_MARKER) {
        let invited = slots.take(Slot::Location);
        let displaced = std::mem::replace(
            &mut slots.0[Slot::InvitedBy as usize],
            invited,
        );
        if displaced != NOT_AVAILABLE && slots.get(Slot::InvitedByAlt) == NOT_AVAILABLE {
            slots.set(Slot::InvitedByAlt, displaced);
        }
    }

    strip_prefixes(slots);
}

fn strip_prefixes(slots: &mut Slots) {
    if let Some(rest) = slots.get(Slot::Activity).strip_prefix(ACTIVE_MARKER) {
        let rest = rest.trim().to_string();
        slots.set(Slot::Activity, rest);
    }
    if let Some(rest) = slots.get(Slot::Joined).strip_prefix(JOINED_MARKER) {
        let rest = rest.trim().to_string();
        slots.set(Slot::Joined, rest);
    }
    if slots.get(Slot::Value).starts_with(CURRENCY_MARKER) {
        let amount = slots
            .get(Slot::Value)
            .replace(CURRENCY_MARKER, "")
            .replace(MONTHLY_SUFFIX, "")
            .trim()
            .to_string();
        slots.set(Slot::Value, amount);
    }
}

fn is_money(token: &str) -> bool {
    token.starts_with(CURRENCY_MARKER) || token.starts_with(FREE_MARKER)
}

fn into_record(mut slots: Slots, today: NaiveDate) -> MemberRecord {
    let joined_on = slots.take(Slot::Joined);
    MemberRecord {
        level: slots.take(Slot::Level),
        display_name: slots.take(Slot::Name),
        handle: slots.take(Slot::Handle),
        phrase: slots.take(Slot::Phrase),
        active_since: slots.take(Slot::Activity),
        tenure: Tenure::since(&joined_on, today),
        joined_on,
        membership_value: slots.take(Slot::Value),
        renews_on: slots.take(Slot::Renews),
        location_or_inviter: slots.take(Slot::Location),
        invited_by: slots.take(Slot::InvitedBy),
        invitation: slots.take(Slot::InvitedByAlt),
        ..MemberRecord::default()
    }
}

fn unresolved_fields(record: &MemberRecord) -> Vec<UnresolvedField> {
    let mut missing = Vec::new();
    let checks = [
        (&record.level, UnresolvedField::Level),
        (&record.display_name, UnresolvedField::DisplayName),
        (&record.handle, UnresolvedField::Handle),
        (&record.active_since, UnresolvedField::ActiveSince),
        (&record.joined_on, UnresolvedField::JoinedOn),
        (&record.membership_value, UnresolvedField::MembershipValue),
    ];
    for (value, field) in checks {
        if value == NOT_AVAILABLE || value.is_empty() {
            missing.push(field);
        }
    }
    if record.tenure.is_none() {
        missing.push(UnresolvedField::Tenure);
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
    }

    fn standard_tokens() -> Vec<&'static str> {
        vec![
            "7",
            "Ana Gómez",
            "@ana-gomez-1234",
            "Chat",
            "Membership",
            "Building my first store",
            "Active 2h ago",
            "Joined Jan 5, 2024",
            "$49/month",
            "Renews in 12 days",
            "Bogotá, Colombia",
            "Invited by Luis Pérez",
        ]
    }

    fn resolve_tokens(tokens: &[&str]) -> Resolution {
        resolve(&RawMemberBlock::from_tokens(tokens.iter().copied()), today())
    }

    fn all_fields(record: &MemberRecord) -> Vec<&str> {
        vec![
            &record.level,
            &record.display_name,
            &record.handle,
            &record.phrase,
            &record.active_since,
            &record.joined_on,
            &record.membership_value,
            &record.renews_on,
            &record.location_or_inviter,
            &record.invited_by,
            &record.invitation,
        ]
        .into_iter()
        .map(String::as_str)
        .collect()
    }

    #[test]
    fn canonical_block_maps_positionally() {
        let resolution = resolve_tokens(&standard_tokens());
        assert_eq!(resolution.unresolved(), &[] as &[UnresolvedField]);
        let record = resolution.record();
        assert_eq!(record.level, "7");
        assert_eq!(record.display_name, "Ana Gómez");
        assert_eq!(record.handle, "@ana-gomez-1234");
        assert_eq!(record.phrase, "Building my first store");
        assert_eq!(record.active_since, "2h ago");
        assert_eq!(record.joined_on, "Jan 5, 2024");
        assert_eq!(record.membership_value, "49");
        assert_eq!(record.renews_on, "Renews in 12 days");
        assert_eq!(record.location_or_inviter, "Bogotá, Colombia");
        assert_eq!(record.invited_by, "Invited by Luis Pérez");
        assert_eq!(record.tenure, Some(Tenure { days: 60, months: 2 }));
    }

    #[test]
    fn admin_marker_rotates_by_exactly_one_and_disappears() {
        let plain = resolve_tokens(&standard_tokens());
        let mut admin_tokens = standard_tokens();
        admin_tokens.insert(2, "(Admin)");
        let admin = resolve_tokens(&admin_tokens);

        assert_eq!(admin.record(), plain.record());
        assert!(all_fields(admin.record())
            .iter()
            .all(|field| !field.contains(ADMIN_MARKER)));
    }

    #[test]
    fn admin_marker_with_full_block_still_never_leaks() {
        let mut tokens = standard_tokens();
        tokens.insert(2, "(Admin)");
        tokens.extend(["extra one", "extra two"]);
        let resolution = resolve_tokens(&tokens);
        assert!(all_fields(resolution.record())
            .iter()
            .all(|field| !field.contains(ADMIN_MARKER)));
    }

    #[test]
    fn blank_phrase_keeps_canonical_positions() {
        let tokens = [
            "7",
            "Ana Gómez",
            "@ana-gomez-1234",
            "Chat",
            "Membership",
            "",
            "Active 2h ago",
            "Joined Jan 5, 2024",
            "$49/month",
            "Renews in 12 days",
            "Bogotá, Colombia",
            "Invited by Luis Pérez",
            "Invited by Marta Ruiz",
        ];
        assert_eq!(tokens.len(), 13);
        let record = resolve_tokens(&tokens).into_record();
        assert_eq!(record.phrase, NOT_AVAILABLE);
        assert_eq!(record.active_since, "2h ago");
        assert_eq!(record.joined_on, "Jan 5, 2024");
        assert_eq!(record.membership_value, "49");
        assert_eq!(record.renews_on, "Renews in 12 days");
        assert_eq!(record.invitation, "Invited by Marta Ruiz");
    }

    #[test]
    fn missing_phrase_shifts_the_tail_back() {
        let tokens: Vec<&str> = standard_tokens()
            .into_iter()
            .filter(|token| *token != "Building my first store")
            .collect();
        let record = resolve_tokens(&tokens).into_record();
        assert_eq!(record.phrase, NOT_AVAILABLE);
        assert_eq!(record.active_since, "2h ago");
        assert_eq!(record.joined_on, "Jan 5, 2024");
        assert_eq!(record.membership_value, "49");
        assert_eq!(record.renews_on, "Renews in 12 days");
        assert_eq!(record.location_or_inviter, "Bogotá, Colombia");
        assert_eq!(record.invited_by, "Invited by Luis Pérez");
    }

    #[test]
    fn free_membership_counts_as_value() {
        let mut tokens = standard_tokens();
        tokens[8] = "Free";
        let record = resolve_tokens(&tokens).into_record();
        assert_eq!(record.membership_value, "Free");
        assert_eq!(record.renews_on, "Renews in 12 days");
    }

    #[test]
    fn stray_line_before_value_is_rotated_out() {
        // A second phrase line pushes the value one slot right.
        let tokens = [
            "7",
            "Ana Gómez",
            "@ana-gomez-1234",
            "Chat",
            "Membership",
            "Building my first store",
            "Active 2h ago",
            "Joined Jan 5, 2024",
            "(cont.) and learning",
            "$49/month",
            "Bogotá, Colombia",
        ];
        let record = resolve_tokens(&tokens).into_record();
        assert_eq!(record.membership_value, "49");
        assert_eq!(record.renews_on, "Bogotá, Colombia");
        assert_eq!(record.location_or_inviter, "(cont.) and learning");
    }

    #[test]
    fn missing_value_lands_renewal_and_location_in_place() {
        let tokens = [
            "7",
            "Ana Gómez",
            "@ana-gomez-1234",
            "Chat",
            "Membership",
            "Building my first store",
            "Active 2h ago",
            "Joined Jan 5, 2024",
            "Renews in 12 days",
            "Bogotá, Colombia",
        ];
        let resolution = resolve_tokens(&tokens);
        assert_eq!(resolution.unresolved(), &[UnresolvedField::MembershipValue]);
        let record = resolution.record();
        assert_eq!(record.membership_value, NOT_AVAILABLE);
        assert_eq!(record.renews_on, "Renews in 12 days");
        assert_eq!(record.location_or_inviter, "Bogotá, Colombia");
    }

    #[test]
    fn renewal_in_location_moves_to_renews() {
        let tokens = [
            "7",
            "Ana Gómez",
            "@ana-gomez-1234",
            "Chat",
            "Membership",
            "Building my first store",
            "Active 2h ago",
            "Joined Jan 5, 2024",
            "$49/month",
            "Cancelled",
            "Renews in 12 days",
        ];
        let record = resolve_tokens(&tokens).into_record();
        assert_eq!(record.renews_on, "Renews in 12 days");
        assert_eq!(record.location_or_inviter, "Cancelled");
    }

    #[test]
    fn invitation_in_location_moves_to_invited_by() {
        let mut tokens = standard_tokens();
        tokens[10] = "Invited by Luis Pérez";
        tokens.truncate(11);
        let record = resolve_tokens(&tokens).into_record();
        assert_eq!(record.invited_by, "Invited by Luis Pérez");
        assert_eq!(record.location_or_inviter, NOT_AVAILABLE);
    }

    #[test]
    fn short_block_is_partially_resolved_with_sentinels() {
        let resolution = resolve_tokens(&["7", "Ana Gómez"]);
        let Resolution::PartiallyResolved(record, missing) = resolution else {
            panic!("expected a partial resolution");
        };
        assert_eq!(record.display_name, "Ana Gómez");
        assert_eq!(record.handle, NOT_AVAILABLE);
        assert!(missing.contains(&UnresolvedField::Handle));
        assert!(missing.contains(&UnresolvedField::Tenure));
        assert!(!missing.contains(&UnresolvedField::DisplayName));
    }

    #[test]
    fn block_text_splits_on_lines() {
        let block = RawMemberBlock::from_text("7\n  Ana Gómez \n\n@ana\n");
        assert_eq!(block.tokens(), &["7", "Ana Gómez", "@ana"]);
        assert_eq!(block.display_name(), Some("Ana Gómez"));
    }
}
