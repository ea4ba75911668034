use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

pub type ParticipantId = String;

/// Giver id to the ordered list of people they buy a gift for.
pub type DrawResult = BTreeMap<ParticipantId, Vec<ParticipantId>>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    #[serde(default)]
    pub is_admin: bool,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_admin: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawConfig {
    /// Distinct recipients each giver is assigned.
    pub gifts_per_giver: usize,
    /// Balanced attempts before falling back to a rotation.
    pub max_attempts: usize,
}

impl Default for DrawConfig {
    fn default() -> Self {
        Self {
            gifts_per_giver: 1,
            max_attempts: 64,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DrawError {
    #[error("roster needs at least two participants, got {0}")]
    RosterTooSmall(usize),
    #[error("gifts per giver must be between 1 and {max}, got {requested}")]
    InvalidGiftCount { requested: usize, max: usize },
    #[error("duplicate participant id {0}")]
    DuplicateParticipant(ParticipantId),
    #[error("generated draw rejected: {0}")]
    InvalidAssignment(#[from] DrawViolation),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DrawViolation {
    #[error("{0} has no entry in the draw")]
    MissingGiver(ParticipantId),
    #[error("giver {0} is not on the roster")]
    UnknownGiver(ParticipantId),
    #[error("{0} has no recipients")]
    NoRecipients(ParticipantId),
    #[error("{0} is assigned to themself")]
    SelfAssignment(ParticipantId),
    #[error("{giver} gives to {recipient}, who is not on the roster")]
    UnknownRecipient {
        giver: ParticipantId,
        recipient: ParticipantId,
    },
    #[error("{giver} gives to {recipient} more than once")]
    RepeatedRecipient {
        giver: ParticipantId,
        recipient: ParticipantId,
    },
}

/// Produce a draw where every participant gives `gifts_per_giver` gifts to
/// distinct other participants and receives exactly as many.
///
/// Gift slots are filled one round at a time. Within a round the givers are
/// visited in random order and each takes the least-chosen eligible
/// recipient, ties broken at random. A dead end (only self or already
/// chosen people left) throws the attempt away. Once `max_attempts` is
/// spent, the draw falls back to rotating a shuffled roster by distinct
/// random offsets, which is always valid for a feasible roster.
pub fn generate<R: Rng + ?Sized>(
    roster: &[Participant],
    config: &DrawConfig,
    rng: &mut R,
) -> Result<DrawResult, DrawError> {
    check_roster(roster, config.gifts_per_giver)?;

    for _ in 0..config.max_attempts {
        let Some(draw) = balanced_attempt(roster, config.gifts_per_giver, rng) else {
            continue;
        };
        if verify(&draw, roster).is_ok() {
            return Ok(draw);
        }
    }

    let draw = rotation(roster, config.gifts_per_giver, rng);
    verify(&draw, roster)?;
    Ok(draw)
}

/// Check a draw against the roster: one entry per participant, at least one
/// recipient each, nobody giving to themself, recipients on the roster and
/// never repeated for the same giver.
pub fn verify(draw: &DrawResult, roster: &[Participant]) -> Result<(), DrawViolation> {
    let known: HashSet<&str> = roster.iter().map(|p| p.id.as_str()).collect();

    for participant in roster {
        if !draw.contains_key(&participant.id) {
            return Err(DrawViolation::MissingGiver(participant.id.clone()));
        }
    }

    for (giver, recipients) in draw {
        if !known.contains(giver.as_str()) {
            return Err(DrawViolation::UnknownGiver(giver.clone()));
        }
        if recipients.is_empty() {
            return Err(DrawViolation::NoRecipients(giver.clone()));
        }
        let mut seen = HashSet::with_capacity(recipients.len());
        for recipient in recipients {
            if recipient == giver {
                return Err(DrawViolation::SelfAssignment(giver.clone()));
            }
            if !known.contains(recipient.as_str()) {
                return Err(DrawViolation::UnknownRecipient {
                    giver: giver.clone(),
                    recipient: recipient.clone(),
                });
            }
            if !seen.insert(recipient.as_str()) {
                return Err(DrawViolation::RepeatedRecipient {
                    giver: giver.clone(),
                    recipient: recipient.clone(),
                });
            }
        }
    }

    Ok(())
}

fn check_roster(roster: &[Participant], gifts_per_giver: usize) -> Result<(), DrawError> {
    if roster.len() < 2 {
        return Err(DrawError::RosterTooSmall(roster.len()));
    }

    let max = roster.len() - 1;
    if gifts_per_giver == 0 || gifts_per_giver > max {
        return Err(DrawError::InvalidGiftCount {
            requested: gifts_per_giver,
            max,
        });
    }

    let mut seen = HashSet::with_capacity(roster.len());
    for participant in roster {
        if !seen.insert(participant.id.as_str()) {
            return Err(DrawError::DuplicateParticipant(participant.id.clone()));
        }
    }

    Ok(())
}

fn balanced_attempt<R: Rng + ?Sized>(
    roster: &[Participant],
    gifts_per_giver: usize,
    rng: &mut R,
) -> Option<DrawResult> {
    let ids: Vec<&str> = roster.iter().map(|p| p.id.as_str()).collect();
    let mut counts: HashMap<&str, usize> = ids.iter().map(|id| (*id, 0)).collect();
    let mut picks: HashMap<&str, Vec<&str>> = ids
        .iter()
        .map(|id| (*id, Vec::with_capacity(gifts_per_giver)))
        .collect();

    for _ in 0..gifts_per_giver {
        let mut givers = ids.clone();
        givers.shuffle(rng);

        for giver in givers {
            let already = picks.get(giver)?;
            let eligible: Vec<&str> = ids
                .iter()
                .copied()
                .filter(|candidate| {
                    *candidate != giver
                        && counts.get(candidate).copied().unwrap_or(usize::MAX) < gifts_per_giver
                        && !already.contains(candidate)
                })
                .collect();

            let lowest = eligible
                .iter()
                .filter_map(|candidate| counts.get(candidate).copied())
                .min()?;
            let least_chosen: Vec<&str> = eligible
                .into_iter()
                .filter(|candidate| counts.get(candidate).copied() == Some(lowest))
                .collect();
            let pick = *least_chosen.choose(rng)?;

            *counts.get_mut(pick)? += 1;
            picks.get_mut(giver)?.push(pick);
        }
    }

    Some(
        picks
            .into_iter()
            .map(|(giver, recipients)| {
                (
                    giver.to_string(),
                    recipients.into_iter().map(str::to_string).collect(),
                )
            })
            .collect(),
    )
}

fn rotation<R: Rng + ?Sized>(
    roster: &[Participant],
    gifts_per_giver: usize,
    rng: &mut R,
) -> DrawResult {
    let mut order: Vec<&str> = roster.iter().map(|p| p.id.as_str()).collect();
    order.shuffle(rng);

    let len = order.len();
    let mut offsets: Vec<usize> = (1..len).collect();
    offsets.shuffle(rng);
    offsets.truncate(gifts_per_giver);

    order
        .iter()
        .enumerate()
        .map(|(index, giver)| {
            let recipients = offsets
                .iter()
                .map(|offset| order[(index + offset) % len].to_string())
                .collect();
            (giver.to_string(), recipients)
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecipientCount {
    pub participant_id: ParticipantId,
    pub name: String,
    pub gifts: usize,
}

/// How evenly a draw spreads gifts over the roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EquitySummary {
    pub counts: Vec<RecipientCount>,
    pub min: usize,
    pub max: usize,
    pub spread: usize,
}

/// Gifts received per participant, in roster order. Recipients that are not
/// on the roster are ignored; with no draw everyone is at zero.
pub fn recipient_counts(draw: Option<&DrawResult>, roster: &[Participant]) -> Vec<RecipientCount> {
    let mut received: HashMap<&str, usize> = HashMap::new();
    if let Some(draw) = draw {
        for recipient in draw.values().flatten() {
            *received.entry(recipient.as_str()).or_insert(0) += 1;
        }
    }

    roster
        .iter()
        .map(|p| RecipientCount {
            participant_id: p.id.clone(),
            name: p.name.clone(),
            gifts: received.get(p.id.as_str()).copied().unwrap_or(0),
        })
        .collect()
}

pub fn equity(draw: Option<&DrawResult>, roster: &[Participant]) -> EquitySummary {
    let counts = recipient_counts(draw, roster);
    let min = counts.iter().map(|c| c.gifts).min().unwrap_or(0);
    let max = counts.iter().map(|c| c.gifts).max().unwrap_or(0);
    EquitySummary {
        counts,
        min,
        max,
        spread: max - min,
    }
}
