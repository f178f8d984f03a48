use crate::{PlayerData, PrimaryKey};

/// A single suggested repayment produced by settlement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInstruction {
    pub from_player_id: PrimaryKey,
    pub from_nickname: String,
    pub from_avatar: Option<String>,
    pub to_player_id: PrimaryKey,
    pub to_nickname: String,
    pub to_avatar: Option<String>,
    pub amount: i32,
}

/// Computes a minimal-ish set of repayments that zeroes out all balances.
///
/// Creditors and debtors are walked in roster order with two cursors, pairing
/// the current debtor against the current creditor for the smaller of the two
/// outstanding amounts. For the same roster the output is identical every
/// time.
pub fn settle(players: &[PlayerData]) -> Vec<TransferInstruction> {
    struct Side<'a> {
        player: &'a PlayerData,
        remaining: i64,
    }

    let mut creditors: Vec<Side> = players
        .iter()
        .filter(|p| p.balance > 0)
        .map(|p| Side {
            player: p,
            remaining: p.balance as i64,
        })
        .collect();

    let mut debtors: Vec<Side> = players
        .iter()
        .filter(|p| p.balance < 0)
        .map(|p| Side {
            player: p,
            remaining: -(p.balance as i64),
        })
        .collect();

    let mut instructions = Vec::new();

    let mut c = 0;
    let mut d = 0;

    while c < creditors.len() && d < debtors.len() {
        let amount = creditors[c].remaining.min(debtors[d].remaining);

        if amount > 0 {
            let creditor = creditors[c].player;
            let debtor = debtors[d].player;

            instructions.push(TransferInstruction {
                from_player_id: debtor.id,
                from_nickname: debtor.nickname.clone(),
                from_avatar: debtor.avatar.clone(),
                to_player_id: creditor.id,
                to_nickname: creditor.nickname.clone(),
                to_avatar: creditor.avatar.clone(),
                amount: amount as i32,
            });

            creditors[c].remaining -= amount;
            debtors[d].remaining -= amount;
        }

        if creditors[c].remaining == 0 {
            c += 1;
        }

        if d < debtors.len() && debtors[d].remaining == 0 {
            d += 1;
        }
    }

    instructions
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn player(id: PrimaryKey, nickname: &str, balance: i32) -> PlayerData {
        PlayerData {
            id,
            room_id: 1,
            user_id: Some(id),
            nickname: nickname.to_string(),
            avatar: None,
            is_online: true,
            balance,
            joined_at: Utc::now(),
        }
    }

    fn pairs(instructions: &[TransferInstruction]) -> Vec<(PrimaryKey, PrimaryKey, i32)> {
        instructions
            .iter()
            .map(|i| (i.from_player_id, i.to_player_id, i.amount))
            .collect()
    }

    #[test]
    fn test_single_creditor_is_paid_by_each_debtor() {
        let players = vec![player(1, "a", 50), player(2, "b", -30), player(3, "c", -20)];

        let instructions = settle(&players);

        assert_eq!(pairs(&instructions), vec![(2, 1, 30), (3, 1, 20)]);
    }

    #[test]
    fn test_settlement_zeroes_out_every_balance() {
        let players = vec![
            player(1, "a", 17),
            player(2, "b", 25),
            player(3, "c", -12),
            player(4, "d", -30),
        ];

        let instructions = settle(&players);

        let mut balances: std::collections::HashMap<_, i64> =
            players.iter().map(|p| (p.id, p.balance as i64)).collect();

        for instruction in &instructions {
            *balances.get_mut(&instruction.from_player_id).unwrap() += instruction.amount as i64;
            *balances.get_mut(&instruction.to_player_id).unwrap() -= instruction.amount as i64;
        }

        assert!(balances.values().all(|b| *b == 0));
    }

    #[test]
    fn test_zero_balances_produce_no_instructions() {
        let players = vec![player(1, "a", 0), player(2, "b", 0)];

        assert!(settle(&players).is_empty());
        assert!(settle(&[]).is_empty());
    }

    #[test]
    fn test_exact_match_advances_both_cursors() {
        let players = vec![
            player(1, "a", 10),
            player(2, "b", -10),
            player(3, "c", 5),
            player(4, "d", -5),
        ];

        let instructions = settle(&players);

        assert_eq!(pairs(&instructions), vec![(2, 1, 10), (4, 3, 5)]);
    }

    #[test]
    fn test_settlement_is_deterministic() {
        let players = vec![
            player(1, "a", 40),
            player(2, "b", -15),
            player(3, "c", -25),
        ];

        assert_eq!(settle(&players), settle(&players));
    }
}
