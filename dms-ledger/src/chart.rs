//! Chart-of-accounts tree.

use crate::error::LedgerResult;
use dms_storage::Store;
use dms_types::{Account, AccountId, AccountNode};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Arrange a flat account list into a forest.
///
/// Accounts whose parent is missing (or that sit on a parent cycle) become
/// roots. Siblings keep the input order.
pub fn build_tree(accounts: Vec<Account>) -> Vec<AccountNode> {
    let ids: HashSet<AccountId> = accounts.iter().map(|a| a.id).collect();
    let parent_of: HashMap<AccountId, AccountId> = accounts
        .iter()
        .filter_map(|a| a.parent_id.filter(|p| ids.contains(p) && *p != a.id).map(|p| (a.id, p)))
        .collect();

    // An account is attached under its parent only if walking up from it
    // reaches a root without revisiting a node.
    let reaches_root = |start: AccountId| {
        let mut seen = HashSet::new();
        let mut cur = start;
        while let Some(&parent) = parent_of.get(&cur) {
            if !seen.insert(cur) {
                return false;
            }
            cur = parent;
        }
        true
    };

    let mut children: HashMap<AccountId, Vec<Account>> = HashMap::new();
    let mut roots = Vec::new();
    for account in accounts {
        match parent_of.get(&account.id) {
            Some(parent) if reaches_root(account.id) => {
                children.entry(*parent).or_default().push(account)
            }
            _ => roots.push(account),
        }
    }

    fn attach(account: Account, children: &mut HashMap<AccountId, Vec<Account>>) -> AccountNode {
        let kids = children.remove(&account.id).unwrap_or_default();
        AccountNode {
            children: kids.into_iter().map(|child| attach(child, children)).collect(),
            account,
        }
    }

    roots.into_iter().map(|root| attach(root, &mut children)).collect()
}

/// Load every account and build the tree.
pub async fn chart_tree(store: &Arc<dyn Store>) -> LedgerResult<Vec<AccountNode>> {
    let store = Arc::clone(store);
    let accounts = tokio::task::spawn_blocking(move || store.list_accounts(None)).await??;
    Ok(build_tree(accounts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dms_types::{AccountType, Money, Stamps};

    fn account(id: i64, parent: Option<i64>) -> Account {
        Account {
            id: AccountId(id),
            acct_type: AccountType::Expense,
            name: format!("A{id}"),
            route_id: None,
            parent_id: parent.map(AccountId),
            opening_balance: Money::ZERO,
            credit_limit: None,
            address: None,
            phone: None,
            stamps: Stamps::default(),
        }
    }

    #[test]
    fn nests_children_under_parents() {
        let tree = build_tree(vec![account(1, None), account(2, Some(1)), account(3, Some(2))]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].children[0].account.id, AccountId(2));
        assert_eq!(tree[0].children[0].children[0].account.id, AccountId(3));
    }

    #[test]
    fn orphans_become_roots() {
        let tree = build_tree(vec![account(1, None), account(2, Some(99))]);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn cycles_do_not_lose_accounts() {
        let tree = build_tree(vec![account(1, Some(2)), account(2, Some(1)), account(3, Some(3))]);
        fn count(nodes: &[AccountNode]) -> usize {
            nodes.iter().map(|n| 1 + count(&n.children)).sum()
        }
        assert_eq!(count(&tree), 3);
    }
}
