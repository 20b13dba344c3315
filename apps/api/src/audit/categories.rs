use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

/// The document slots an audit session collects uploads into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileCategory {
    TrialBalance,
    GeneralLedger,
    ProfitAndLoss,
    BalanceSheet,
    BankStatements,
    SalesInvoices,
    PurchaseInvoices,
    Expenses,
    Other,
}

impl FileCategory {
    pub const ALL: [FileCategory; 9] = [
        FileCategory::TrialBalance,
        FileCategory::GeneralLedger,
        FileCategory::ProfitAndLoss,
        FileCategory::BalanceSheet,
        FileCategory::BankStatements,
        FileCategory::SalesInvoices,
        FileCategory::PurchaseInvoices,
        FileCategory::Expenses,
        FileCategory::Other,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            FileCategory::TrialBalance => "trial_balance",
            FileCategory::GeneralLedger => "general_ledger",
            FileCategory::ProfitAndLoss => "pnl",
            FileCategory::BalanceSheet => "balance_sheet",
            FileCategory::BankStatements => "bank_statements",
            FileCategory::SalesInvoices => "invoices_sales",
            FileCategory::PurchaseInvoices => "invoices_purchase",
            FileCategory::Expenses => "expenses",
            FileCategory::Other => "other",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            FileCategory::TrialBalance => "Trial Balance",
            FileCategory::GeneralLedger => "General Ledger",
            FileCategory::ProfitAndLoss => "Profit & Loss",
            FileCategory::BalanceSheet => "Balance Sheet",
            FileCategory::BankStatements => "Bank Statements",
            FileCategory::SalesInvoices => "Sales Invoices",
            FileCategory::PurchaseInvoices => "Purchase Invoices",
            FileCategory::Expenses => "Expense Records",
            FileCategory::Other => "Other Documents",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FileCategory::TrialBalance => "Opening and closing trial balance",
            FileCategory::GeneralLedger => "Complete GL with all transactions",
            FileCategory::ProfitAndLoss => "Income statement for the period",
            FileCategory::BalanceSheet => "Statement of financial position",
            FileCategory::BankStatements => "Bank account statements",
            FileCategory::SalesInvoices => "Sales and revenue invoices",
            FileCategory::PurchaseInvoices => "Vendor and expense invoices",
            FileCategory::Expenses => "Detailed expense breakdown",
            FileCategory::Other => "Additional supporting documents",
        }
    }

    /// The four core statements every session needs before analysis.
    pub fn is_required(&self) -> bool {
        matches!(
            self,
            FileCategory::TrialBalance
                | FileCategory::GeneralLedger
                | FileCategory::ProfitAndLoss
                | FileCategory::BalanceSheet
        )
    }

    pub fn required() -> impl Iterator<Item = FileCategory> {
        Self::ALL.into_iter().filter(FileCategory::is_required)
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for FileCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.id() == s)
            .ok_or_else(|| format!("Unknown file category '{s}'"))
    }
}

impl Serialize for FileCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.id())
    }
}

/// Catalogue entry returned to clients building the upload screen.
#[derive(Debug, Serialize)]
pub struct CategoryInfo {
    pub id: FileCategory,
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
}

pub fn catalogue() -> Vec<CategoryInfo> {
    FileCategory::ALL
        .into_iter()
        .map(|c| CategoryInfo {
            id: c,
            name: c.display_name(),
            description: c.description(),
            required: c.is_required(),
        })
        .collect()
}
