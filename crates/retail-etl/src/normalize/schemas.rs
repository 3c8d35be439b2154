//! Built-in schemas for the six warehouse tables

use super::rules::{Check, ColumnRule, Repair};
use super::DatasetSchema;
use retail_common::EtlError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const CARD_PROVIDERS: &[&str] = &[
    "VISA 16 digit",
    "VISA 13 digit",
    "VISA 19 digit",
    "Mastercard",
    "JCB 16 digit",
    "JCB 15 digit",
    "Discover",
    "American Express",
    "Maestro",
    "Diners Club / Carte Blanche",
];

pub const STORE_TYPES: &[&str] = &["Local", "Super Store", "Mall Kiosk", "Outlet", "Web Portal"];

pub const CONTINENTS: &[&str] = &["Europe", "America"];

pub const TIME_PERIODS: &[&str] = &["Evening", "Morning", "Midday", "Late_Hours"];

pub const PRODUCT_CATEGORIES: &[&str] = &[
    "toys-and-games",
    "sports-and-leisure",
    "pets",
    "homeware",
    "health-and-beauty",
    "food-and-drink",
    "diy",
];

const DIGITS: &str = r"^\d+$";
const EXPIRY_DATE: &str = r"^(0[1-9]|1[0-2])/\d{2}$";
const PRODUCT_CODE: &str = r"^[a-zA-Z]\d-[a-zA-Z0-9]+$";
const TIMESTAMP: &str = r"^\d{2}:\d{2}:\d{2}$";

/// Destination tables of the star schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseTable {
    DimUsers,
    DimCardDetails,
    DimStoreDetails,
    DimProducts,
    OrdersTable,
    DimDateTimes,
}

impl WarehouseTable {
    pub fn all() -> [WarehouseTable; 6] {
        [
            WarehouseTable::DimUsers,
            WarehouseTable::DimCardDetails,
            WarehouseTable::DimStoreDetails,
            WarehouseTable::DimProducts,
            WarehouseTable::OrdersTable,
            WarehouseTable::DimDateTimes,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WarehouseTable::DimUsers => "dim_users",
            WarehouseTable::DimCardDetails => "dim_card_details",
            WarehouseTable::DimStoreDetails => "dim_store_details",
            WarehouseTable::DimProducts => "dim_products",
            WarehouseTable::OrdersTable => "orders_table",
            WarehouseTable::DimDateTimes => "dim_date_times",
        }
    }

    pub fn schema(&self) -> DatasetSchema {
        match self {
            WarehouseTable::DimUsers => users(),
            WarehouseTable::DimCardDetails => card_details(),
            WarehouseTable::DimStoreDetails => store_details(),
            WarehouseTable::DimProducts => products(),
            WarehouseTable::OrdersTable => orders(),
            WarehouseTable::DimDateTimes => date_times(),
        }
    }
}

impl fmt::Display for WarehouseTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WarehouseTable {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WarehouseTable::all()
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| EtlError::Config(format!("unknown warehouse table '{}'", s)))
    }
}

fn users() -> DatasetSchema {
    DatasetSchema::new("dim_users", "user_uuid")
        .column(ColumnRule::text("first_name"))
        .column(ColumnRule::text("last_name"))
        .column(ColumnRule::date("date_of_birth"))
        .column(ColumnRule::text("company"))
        .column(ColumnRule::text("email_address").repair(Repair::replace("@@", "@")))
        .column(ColumnRule::text("address"))
        .column(ColumnRule::text("country"))
        .column(
            ColumnRule::text("country_code")
                .repair(Repair::map("GGB", "GB"))
                .check(Check::Length(2)),
        )
        .column(ColumnRule::text("phone_number").repair(Repair::strip("x.")))
        .column(ColumnRule::date("join_date"))
        .column(ColumnRule::uuid("user_uuid"))
}

fn card_details() -> DatasetSchema {
    DatasetSchema::new("dim_card_details", "card_number")
        .column(
            ColumnRule::text("card_number")
                .repair(Repair::strip("?"))
                .check(Check::Pattern(DIGITS.to_string())),
        )
        .column(ColumnRule::text("expiry_date").check(Check::Pattern(EXPIRY_DATE.to_string())))
        .column(ColumnRule::category("card_provider", CARD_PROVIDERS))
        .column(ColumnRule::date("date_payment_confirmed"))
}

fn store_details() -> DatasetSchema {
    DatasetSchema::new("dim_store_details", "store_code")
        .column(ColumnRule::text("store_code"))
        .column(ColumnRule::category("store_type", STORE_TYPES))
        .column(
            ColumnRule::integer("staff_numbers")
                .repair(Repair::KeepDigits)
                .check(Check::Min(0.0)),
        )
        .column(ColumnRule::text("locality").nullable())
        .column(ColumnRule::text("address").nullable())
        .column(ColumnRule::text("country_code").check(Check::Length(2)))
        .column(ColumnRule::category("continent", CONTINENTS).repair(Repair::replace("ee", "")))
        .column(
            ColumnRule::float("longitude")
                .nullable()
                .check(Check::Min(-180.0))
                .check(Check::Max(180.0)),
        )
        .column(
            ColumnRule::float("latitude")
                .nullable()
                .check(Check::Min(-90.0))
                .check(Check::Max(90.0)),
        )
        .column(ColumnRule::date("opening_date"))
}

fn products() -> DatasetSchema {
    DatasetSchema::new("dim_products", "product_code")
        .column(ColumnRule::text("product_name"))
        .column(
            ColumnRule::float("product_price")
                .repair(Repair::strip("£"))
                .check(Check::Min(0.0)),
        )
        .column(
            ColumnRule::float("weight")
                .repair(Repair::WeightToKg)
                .check(Check::Min(0.0)),
        )
        .column(ColumnRule::category("category", PRODUCT_CATEGORIES))
        .column(ColumnRule::text("EAN").check(Check::Pattern(DIGITS.to_string())))
        .column(ColumnRule::date("date_added"))
        .column(ColumnRule::uuid("uuid"))
        .column(
            ColumnRule::boolean("still_available", &["Still_avaliable"], &["Removed"])
                .alias("removed"),
        )
        .column(ColumnRule::text("product_code").check(Check::Pattern(PRODUCT_CODE.to_string())))
}

fn orders() -> DatasetSchema {
    DatasetSchema::new("orders_table", "date_uuid")
        .column(ColumnRule::uuid("date_uuid"))
        .column(ColumnRule::uuid("user_uuid"))
        .column(ColumnRule::text("card_number").check(Check::Pattern(DIGITS.to_string())))
        .column(ColumnRule::text("store_code"))
        .column(ColumnRule::text("product_code"))
        .column(ColumnRule::integer("product_quantity").check(Check::Min(0.0)))
}

fn date_times() -> DatasetSchema {
    DatasetSchema::new("dim_date_times", "date_uuid")
        .column(ColumnRule::text("timestamp").check(Check::Pattern(TIMESTAMP.to_string())))
        .column(
            ColumnRule::integer("month")
                .check(Check::Min(1.0))
                .check(Check::Max(12.0)),
        )
        .column(
            ColumnRule::integer("year")
                .check(Check::Min(1900.0))
                .check(Check::Max(2100.0)),
        )
        .column(
            ColumnRule::integer("day")
                .check(Check::Min(1.0))
                .check(Check::Max(31.0)),
        )
        .column(ColumnRule::category("time_period", TIME_PERIODS))
        .column(ColumnRule::uuid("date_uuid"))
        .column(ColumnRule::timestamp("date").derived_from("{year}-{month}-{day} {timestamp}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use retail_common::types::{Dataset, RawRecord, RawValue, Value};

    fn row(fields: &[(&str, &str)]) -> RawRecord {
        fields.iter().map(|(k, v)| (*k, RawValue::from(*v))).collect()
    }

    #[test]
    fn test_table_names_round_trip() {
        for table in WarehouseTable::all() {
            assert_eq!(table.as_str().parse::<WarehouseTable>().unwrap(), table);
            assert_eq!(table.schema().name, table.as_str());
        }
        assert!("dim_weather".parse::<WarehouseTable>().is_err());
    }

    #[test]
    fn test_users_cleaning() {
        let mut raw = Dataset::new("legacy_users");
        raw.push(row(&[
            ("index", "0"),
            ("first_name", "Sigfried"),
            ("last_name", "Noack"),
            ("date_of_birth", "1990-09-30"),
            ("company", "Heuser GmbH"),
            ("email_address", "rudi79@@winkler.de"),
            ("address", "Zimmerstr. 1/0"),
            ("country", "United Kingdom"),
            ("country_code", "GGB"),
            ("phone_number", "+49(0)047905356x."),
            ("join_date", "2018 October 10"),
            ("user_uuid", "93caf182-e4e9-4c6e-bebb-60a1a3dcf0f6"),
        ]));
        raw.push(row(&[
            ("first_name", "NULL"),
            ("user_uuid", "NULL"),
        ]));

        let users = normalize(&raw, &WarehouseTable::DimUsers.schema()).unwrap();

        assert_eq!(users.len(), 1);
        assert_eq!(users.report.rejected_rows, 1);
        assert_eq!(users.column_values("email_address"), vec![&Value::Text("rudi79@winkler.de".into())]);
        assert_eq!(users.column_values("country_code"), vec![&Value::Text("GB".into())]);
        assert_eq!(users.column_values("phone_number"), vec![&Value::Text("+49(0)047905356".into())]);
        assert!(users.column_index("index").is_none());
    }

    #[test]
    fn test_store_details_web_portal_keeps_nulls() {
        let mut raw = Dataset::new("stores");
        raw.push(row(&[
            ("index", "0"),
            ("address", "N/A"),
            ("longitude", "N/A"),
            ("lat", "N/A"),
            ("locality", "N/A"),
            ("store_code", "WEB-1388012W"),
            ("staff_numbers", "325"),
            ("opening_date", "2010-06-12"),
            ("store_type", "Web Portal"),
            ("latitude", "N/A"),
            ("country_code", "GB"),
            ("continent", "Europe"),
        ]));
        raw.push(row(&[
            ("store_code", "HA-7AB2AE9E"),
            ("staff_numbers", "J78"),
            ("opening_date", "1996/10/25"),
            ("store_type", "Super Store"),
            ("longitude", "-0.33"),
            ("latitude", "51.58"),
            ("locality", "High Wycombe"),
            ("address", "Flat 6\nHigh Wycombe"),
            ("country_code", "GB"),
            ("continent", "eeEurope"),
        ]));
        raw.push(row(&[
            ("store_code", "NRQKZWJ9OZ"),
            ("store_type", "QP74AHEQT0"),
            ("staff_numbers", "A97"),
            ("opening_date", "3ZZ5UCZR5D"),
            ("country_code", "QP74AHEQT0"),
            ("continent", "QMAVR5H3LD"),
        ]));

        let stores = normalize(&raw, &WarehouseTable::DimStoreDetails.schema()).unwrap();

        assert_eq!(stores.len(), 2);
        assert_eq!(stores.column_values("longitude")[0], &Value::Null);
        assert_eq!(stores.column_values("staff_numbers")[1], &Value::Integer(78));
        assert_eq!(stores.column_values("continent")[1], &Value::Category("Europe".into()));
        assert!(stores.column_index("lat").is_none());
        assert_eq!(stores.report.rejections_by_column.get("store_type"), Some(&1));
    }

    #[test]
    fn test_products_cleaning() {
        let mut raw = Dataset::new("products");
        raw.push(row(&[
            ("Unnamed: 0", "0"),
            ("product_name", "FurReal Dazzlin' Dimples My Playful Dolphin"),
            ("product_price", "£39.99"),
            ("weight", "1.6kg"),
            ("category", "toys-and-games"),
            ("EAN", "7425710935115"),
            ("date_added", "2005-12-02"),
            ("uuid", "83dc0a69-f96f-4c34-bcb7-928acae19a94"),
            ("removed", "Still_avaliable"),
            ("product_code", "R7-3126933h"),
        ]));
        raw.push(row(&[
            ("product_name", "Multipack"),
            ("product_price", "£5.00"),
            ("weight", "12 x 100g"),
            ("category", "food-and-drink"),
            ("EAN", "1234567890123"),
            ("date_added", "2018-01-01"),
            ("uuid", "13dc0a69-f96f-4c34-bcb7-928acae19a94"),
            ("removed", "Removed"),
            ("product_code", "a1-BC9"),
        ]));

        let products = normalize(&raw, &WarehouseTable::DimProducts.schema()).unwrap();

        assert_eq!(products.len(), 2);
        assert_eq!(
            products.column_values("weight"),
            vec![&Value::Float(1.6), &Value::Float(1.2)]
        );
        assert_eq!(products.column_values("product_price")[0], &Value::Float(39.99));
        assert_eq!(
            products.column_values("still_available"),
            vec![&Value::Boolean(true), &Value::Boolean(false)]
        );
    }

    #[test]
    fn test_card_details_cleaning() {
        let mut raw = Dataset::new("cards");
        for (number, expiry, provider) in [
            ("??4971858637664481", "09/26", "VISA 16 digit"),
            ("4654492346226715", "NB71VBAHJE", "VISA 16 digit"),
            ("6011034283423960", "04/25", "NB71VBAHJE"),
        ] {
            raw.push(row(&[
                ("card_number", number),
                ("expiry_date", expiry),
                ("card_provider", provider),
                ("date_payment_confirmed", "2015-11-25"),
            ]));
        }

        let cards = normalize(&raw, &WarehouseTable::DimCardDetails.schema()).unwrap();

        assert_eq!(cards.column_values("card_number"), vec![&Value::Text("4971858637664481".into())]);
        assert_eq!(cards.report.rejected_rows, 2);
    }

    #[test]
    fn test_date_times_cleaning() {
        let mut raw = Dataset::new("events");
        raw.push(row(&[
            ("timestamp", "22:00:06"),
            ("month", "9"),
            ("year", "2012"),
            ("day", "19"),
            ("time_period", "Evening"),
            ("date_uuid", "3b7ca996-37f9-433f-b6d0-ce8391b615ad"),
        ]));
        raw.push(row(&[
            ("timestamp", "NULL"),
            ("month", "NULL"),
            ("year", "NULL"),
            ("day", "NULL"),
            ("time_period", "NULL"),
            ("date_uuid", "NULL"),
        ]));
        raw.push(row(&[
            ("timestamp", "22:00:06"),
            ("month", "13"),
            ("year", "2012"),
            ("day", "19"),
            ("time_period", "Evening"),
            ("date_uuid", "4b7ca996-37f9-433f-b6d0-ce8391b615ad"),
        ]));

        let events = normalize(&raw, &WarehouseTable::DimDateTimes.schema()).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events.column_values("month"), vec![&Value::Integer(9)]);
        assert_eq!(events.report.rejections_by_column.get("month"), Some(&1));
        assert_eq!(events.report.rejections_by_column.get("timestamp"), Some(&1));

        let at = chrono::NaiveDate::from_ymd_opt(2012, 9, 19)
            .unwrap()
            .and_hms_opt(22, 0, 6)
            .unwrap();
        assert_eq!(events.column_values("date"), vec![&Value::Timestamp(at)]);
        assert_eq!(
            events.columns.last().map(|c| c.column_type),
            Some(retail_common::types::ColumnType::Timestamp)
        );

        // Loaded rows already carry the derived column and keep it on a second pass
        let again = normalize(&events.to_raw(), &WarehouseTable::DimDateTimes.schema()).unwrap();
        assert!(again.same_contents(&events));
    }

    #[test]
    fn test_orders_drop_extra_columns() {
        let mut raw = Dataset::new("orders");
        raw.push(row(&[
            ("level_0", "0"),
            ("index", "0"),
            ("date_uuid", "9476f17e-5d6a-4117-874d-9cdb38ca1fa6"),
            ("first_name", "Gabriel"),
            ("last_name", "Haley"),
            ("user_uuid", "93caf182-e4e9-4c6e-bebb-60a1a3dcf0f6"),
            ("card_number", "30060773296197"),
            ("store_code", "BL-8387506C"),
            ("product_code", "R7-3126933h"),
            ("1", "NULL"),
            ("product_quantity", "3"),
        ]));

        let orders = normalize(&raw, &WarehouseTable::OrdersTable.schema()).unwrap();

        let names: Vec<_> = orders.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["date_uuid", "user_uuid", "card_number", "store_code", "product_code", "product_quantity"]
        );
        assert_eq!(orders.column_values("product_quantity"), vec![&Value::Integer(3)]);
    }
}
