//! Snapshot → page. Called by the app after every state change.

use atm_api_types::{AtmSnapshot, OperationKind, PendingOperation};

use crate::dom::{self, Elements};

pub fn render(els: &Elements, snapshot: &AtmSnapshot) {
    let connected = snapshot.account.is_some();
    dom::show(&els.install_prompt, !snapshot.provider_present);
    dom::show(
        els.connect_btn.as_ref(),
        snapshot.provider_present && !connected,
    );
    dom::show(&els.account_panel, connected);

    if let Some(account) = &snapshot.account {
        dom::set_text(&els.account, account.as_str());
    }
    dom::set_text(&els.balance, &balance_text(snapshot));
    dom::set_text(
        &els.pending,
        &snapshot.pending.as_ref().map(pending_text).unwrap_or_default(),
    );
    dom::set_text(
        &els.error,
        snapshot.last_error_message.as_deref().unwrap_or_default(),
    );

    let busy = snapshot.pending.is_some();
    for button in els.action_buttons() {
        button.set_disabled(busy);
    }
}

pub fn balance_text(snapshot: &AtmSnapshot) -> String {
    match (snapshot.balance, snapshot.balance_stale) {
        (None, _) => "…".to_owned(),
        (Some(value), false) => value.to_string(),
        (Some(value), true) => format!("{value} (updating)"),
    }
}

pub fn pending_text(pending: &PendingOperation) -> String {
    let verb = match pending.kind {
        OperationKind::Deposit => "Depositing",
        OperationKind::Withdraw => "Withdrawing",
        OperationKind::Burn => "Burning",
    };
    match &pending.tx_hash {
        None => format!("{verb} {}: confirm in your wallet", pending.amount),
        Some(hash) => format!("{verb} {}: waiting for {hash}", pending.amount),
    }
}
