use crate::core::{MigrateError, Result, Value};
use crate::idmap::{JoinDescriptor, SourceIdStatus, projected_alias};
use crate::migration::MigrationDescriptor;
use crate::query::{ConditionGroup, Expr, SelectQuery, SortDirection};

pub const MAP_ALIAS: &str = "map";

/// Restrict `base` to the rows a run has to process.
///
/// With `map_join`, the id map is left-joined on the source key and rows
/// with no destination key or flagged for update pass. With a non-empty
/// `high_water`, rows above it pass. Both predicates share one OR group that
/// is ANDed into the base conditions; with neither, `base` is returned
/// unrestricted.
pub fn augment(
    base: &SelectQuery,
    descriptor: &MigrationDescriptor,
    map_join: Option<&JoinDescriptor>,
    high_water: Option<&Value>,
) -> Result<SelectQuery> {
    if !descriptor.ignore_map && descriptor.source_keys.is_empty() {
        return Err(MigrateError::ConfigurationError(format!(
            "Migration '{}' joins the id map but declares no source keys",
            descriptor.id
        )));
    }

    let mut query = base.clone();
    let base_alias = query.from_table().alias.clone();
    let mut pending = ConditionGroup::or();

    if let Some(join) = map_join.filter(|_| !descriptor.ignore_map) {
        if join.source_columns.len() != descriptor.source_keys.len() {
            return Err(MigrateError::ConfigurationError(format!(
                "Id map for '{}' is keyed on {} columns, migration declares {}",
                descriptor.id,
                join.source_columns.len(),
                descriptor.source_keys.len()
            )));
        }

        let map_alias = query.unique_alias(MAP_ALIAS);
        let on = descriptor
            .source_keys
            .iter()
            .zip(&join.source_columns)
            .map(|(key, map_column)| {
                Expr::eq(
                    Expr::Column(key.column_ref(&base_alias)),
                    Expr::column(&map_alias, map_column),
                )
            })
            .reduce(Expr::and)
            .ok_or_else(|| MigrateError::ConfigurationError("Empty source key".to_string()))?;
        let map_alias = query.left_join(&join.table_name, &map_alias, on);

        if let Some(first_destination) = join.destination_columns.first() {
            pending.push(Expr::is_null(Expr::column(&map_alias, first_destination)));
        }
        pending.push(Expr::eq(
            Expr::column(&map_alias, &join.status_column),
            Expr::literal(SourceIdStatus::NeedsUpdate.code()),
        ));

        let projected = join
            .source_columns
            .iter()
            .chain(&join.destination_columns)
            .chain([&join.status_column, &join.hash_column]);
        for column in projected {
            query.field(&map_alias, column, Some(&projected_alias(column)));
        }
    }

    if let Some(property) = &descriptor.high_water_property {
        let column = property.column_ref(&base_alias);
        if let Some(value) = high_water.filter(|v| !v.is_empty()) {
            pending.push(Expr::gt(Expr::Column(column.clone()), Expr::literal(value.clone())));
        }
        query.order_by(column, SortDirection::Asc);
    }

    query.condition_group(pending);
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::migration::{HighWaterProperty, KeyField};
    use crate::query::IdentifierQuoter;

    fn base() -> SelectQuery {
        let mut query = SelectQuery::new("node", "n");
        query.all_fields("n");
        query
    }

    fn descriptor() -> MigrationDescriptor {
        MigrationDescriptor::new("article")
            .source_key(KeyField::new("nid", DataType::Integer))
            .destination_key(KeyField::new("id", DataType::Integer))
            .high_water(HighWaterProperty::new("changed"))
    }

    fn join() -> JoinDescriptor {
        JoinDescriptor {
            table_name: "tracking.migrate_map_article".into(),
            source_columns: vec!["sourceid1".into()],
            destination_columns: vec!["destid1".into()],
            status_column: "source_row_status".into(),
            hash_column: "hash".into(),
        }
    }

    #[test]
    fn test_full_augmentation_sql() {
        let query = augment(&base(), &descriptor(), Some(&join()), Some(&Value::Integer(30))).unwrap();
        let sql = query.to_sql(&IdentifierQuoter::ansi());

        assert!(sql.contains(r#"LEFT OUTER JOIN "tracking"."migrate_map_article" "map""#));
        assert!(sql.contains(r#"("n"."nid" = "map"."sourceid1")"#));
        assert!(sql.contains(r#""map"."destid1" IS NULL"#));
        assert!(sql.contains(r#"("map"."source_row_status" = 1)"#));
        assert!(sql.contains(r#"("n"."changed" > 30)"#));
        assert!(sql.contains(r#""map"."destid1" AS "migrate_map_destid1""#));
        assert!(sql.ends_with(r#"ORDER BY "n"."changed" ASC"#));
    }

    #[test]
    fn test_no_restriction_without_map_or_high_water() {
        let query = augment(&base(), &descriptor(), None, None).unwrap();
        assert!(query.conditions().is_empty());
        assert!(query.joins().is_empty());
    }

    #[test]
    fn test_empty_high_water_is_ignored() {
        let query = augment(&base(), &descriptor(), None, Some(&Value::Text(String::new()))).unwrap();
        assert!(query.conditions().is_empty());
        assert_eq!(query.order_by_clauses().len(), 1);
    }

    #[test]
    fn test_ignore_map_skips_join() {
        let descriptor = descriptor().ignore_map(true);
        let query = augment(&base(), &descriptor, Some(&join()), Some(&Value::Integer(30))).unwrap();
        assert!(query.joins().is_empty());
        assert_eq!(query.conditions().len(), 1);
    }

    #[test]
    fn test_missing_keys_fail_fast() {
        let descriptor = MigrationDescriptor::new("article");
        assert!(matches!(
            augment(&base(), &descriptor, None, None),
            Err(MigrateError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_taken_alias() {
        let mut base = SelectQuery::new("node", "map");
        base.all_fields("map");
        let descriptor = descriptor();
        let query = augment(&base, &descriptor, Some(&join()), None).unwrap();
        assert_eq!(query.joins()[0].table.alias, "map_2");
    }

    #[test]
    fn test_base_conditions_are_kept() {
        let mut base = base();
        base.condition(Expr::eq(Expr::column("n", "type"), Expr::literal("article")));
        let query = augment(&base, &descriptor(), Some(&join()), None).unwrap();

        let conditions = query.conditions().conditions();
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0], Expr::eq(Expr::column("n", "type"), Expr::literal("article")));
    }
}
