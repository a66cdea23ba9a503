//! Menu buttons and their decoding. Button presses arrive as plain text,
//! so each label is decoded once here into a typed action and the rest of
//! the bot never compares display strings.

use teloxide::types::{
    InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup,
};

pub const BTN_BALANCE: &str = "💰 Balance";
pub const BTN_PROFILE: &str = "👤 Profile";
pub const BTN_REFERRAL: &str = "🔗 Referral Link";
pub const BTN_SET_WALLET: &str = "💳 Set Wallet";
pub const BTN_WITHDRAW: &str = "💸 Withdraw";
pub const BTN_HELP: &str = "❓ Help";
pub const BTN_JOINED: &str = "✅ I Joined All Groups";
pub const BTN_CANCEL: &str = "⬅️ Cancel";

/// Typed menu action decoded from a button press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    Balance,
    Profile,
    Referral,
    SetWallet,
    Withdraw,
    Help,
    ConfirmGroups,
    Cancel,
}

impl MenuAction {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            BTN_BALANCE => Some(MenuAction::Balance),
            BTN_PROFILE => Some(MenuAction::Profile),
            BTN_REFERRAL => Some(MenuAction::Referral),
            BTN_SET_WALLET => Some(MenuAction::SetWallet),
            BTN_WITHDRAW => Some(MenuAction::Withdraw),
            BTN_HELP => Some(MenuAction::Help),
            BTN_JOINED => Some(MenuAction::ConfirmGroups),
            BTN_CANCEL => Some(MenuAction::Cancel),
            _ => None,
        }
    }
}

pub fn main_menu() -> KeyboardMarkup {
    let rows = vec![
        vec![
            KeyboardButton::new(BTN_BALANCE),
            KeyboardButton::new(BTN_PROFILE),
        ],
        vec![
            KeyboardButton::new(BTN_REFERRAL),
            KeyboardButton::new(BTN_SET_WALLET),
        ],
        vec![
            KeyboardButton::new(BTN_WITHDRAW),
            KeyboardButton::new(BTN_HELP),
        ],
    ];
    let mut kb = KeyboardMarkup::new(rows);
    kb.resize_keyboard = true;
    kb
}

pub fn groups_menu() -> KeyboardMarkup {
    let mut kb = KeyboardMarkup::new(vec![vec![KeyboardButton::new(BTN_JOINED)]]);
    kb.resize_keyboard = true;
    kb
}

pub fn cancel_menu() -> KeyboardMarkup {
    let mut kb = KeyboardMarkup::new(vec![vec![KeyboardButton::new(BTN_CANCEL)]]);
    kb.resize_keyboard = true;
    kb
}

/// Inline approve/reject buttons attached to the admin notification for a
/// new withdrawal request.
pub fn withdrawal_review(withdrawal_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("✅ Approve", format!("wd:approve:{withdrawal_id}")),
        InlineKeyboardButton::callback("❌ Reject", format!("wd:reject:{withdrawal_id}")),
    ]])
}

/// Admin review verdicts carried in callback data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Approve(i64),
    Reject(i64),
}

impl ReviewAction {
    pub fn parse(data: &str) -> Option<Self> {
        let rest = data.strip_prefix("wd:")?;
        let (verb, id) = rest.split_once(':')?;
        let id: i64 = id.parse().ok()?;
        match verb {
            "approve" => Some(ReviewAction::Approve(id)),
            "reject" => Some(ReviewAction::Reject(id)),
            _ => None,
        }
    }
}
