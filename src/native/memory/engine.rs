//! Statement execution against the in-memory tables

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::ora;
use super::sql::{self, ColType, ColumnDef, Cond, Expr, Returning, Scope, Select, SelectItem, Sql, SqlResult};
use super::state::{Cell, Change, Delivery, Fault, Materialized, Res, State, Table, Undo};
use crate::constants::ora as code;
use crate::native::{ColumnDesc, DataType, Datum, Diagnostic, ExecMode, Status};
use crate::subscription::ObjectEvent;

/// Bind values seen by one iteration of an array execution
pub(super) struct Binds<'a> {
    pub values: &'a HashMap<String, Vec<Datum>>,
    pub iteration: usize,
}

impl Binds<'_> {
    pub fn get(&self, name: &str) -> SqlResult<Datum> {
        match self.values.get(name) {
            Some(values) => Ok(values
                .get(self.iteration)
                .or_else(|| values.last())
                .cloned()
                .unwrap_or(Datum::Null)),
            None => Err(not_bound(name)),
        }
    }
}

pub(super) fn not_bound(name: &str) -> Diagnostic {
    ora(
        code::NOT_ALL_VARIABLES_BOUND,
        format!("not all variables bound (:{})", name),
    )
}

fn invalid_identifier(name: &str) -> Diagnostic {
    ora(code::INVALID_IDENTIFIER, format!("\"{}\": invalid identifier", name))
}

fn table_not_found() -> Diagnostic {
    ora(code::TABLE_NOT_FOUND, "table or view does not exist")
}

fn column_index(columns: &[ColumnDef], name: &str) -> SqlResult<usize> {
    columns
        .iter()
        .position(|c| c.name == name)
        .ok_or_else(|| invalid_identifier(name))
}

struct RowScope<'a> {
    binds: &'a Binds<'a>,
    columns: &'a [ColumnDef],
    cells: Option<&'a [Cell]>,
}

impl Scope for RowScope<'_> {
    fn bind(&self, name: &str) -> SqlResult<Datum> {
        self.binds.get(name)
    }

    fn column(&self, name: &str) -> SqlResult<Datum> {
        let cells = self.cells.ok_or_else(|| invalid_identifier(name))?;
        match &cells[column_index(self.columns, name)?] {
            Cell::Value(d) => Ok(d.clone()),
            _ => Err(sql::inconsistent()),
        }
    }
}

fn eval_with(expr: &Expr, scope: &RowScope<'_>) -> SqlResult<Datum> {
    match expr {
        // handles pass through untouched
        Expr::Bind(name) => scope.bind(name),
        other => sql::eval(other, scope),
    }
}

fn describe(def: &ColumnDef) -> ColumnDesc {
    let mut desc = ColumnDesc::new(def.name.clone(), def.ty.data_type());
    desc.size = def.ty.size();
    if let ColType::Number { precision, scale } = def.ty {
        desc.precision = precision;
        desc.scale = scale;
    }
    desc.nullable = !(def.not_null || def.primary_key);
    desc.type_name = def.ty.type_name().map(str::to_string);
    desc
}

fn filter_rows<'a>(
    columns: &[ColumnDef],
    rows: impl Iterator<Item = (u64, &'a Vec<Cell>)>,
    filter: &[Cond],
    binds: &Binds<'_>,
) -> SqlResult<Vec<(u64, Vec<Cell>)>> {
    let mut out = Vec::new();
    'rows: for (rowid, cells) in rows {
        let scope = RowScope {
            binds,
            columns,
            cells: Some(cells.as_slice()),
        };
        for cond in filter {
            if !sql::matches(cond, &scope)? {
                continue 'rows;
            }
        }
        out.push((rowid, cells.clone()));
    }
    Ok(out)
}

fn order_datums(a: &Datum, b: &Datum) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => sql::compare(a, b).ok().flatten().unwrap_or(Ordering::Equal),
    }
}

enum Getter {
    Column(usize),
    Expr(Expr),
}

impl State {
    /// Execute a parsed non-PL/SQL statement
    pub(super) fn execute_sql(
        &mut self,
        session: u64,
        stmt: u64,
        sql: &Sql,
        iters: u32,
        mode: ExecMode,
        out: &mut Vec<Delivery>,
    ) -> Res<Status> {
        let binds = self.stmt(stmt)?.binds.clone();
        match sql {
            Sql::CreateTable { name, columns } => {
                self.commit(session, out)?;
                self.create_table(name, columns)?;
            }
            Sql::DropTable { name } => {
                self.commit(session, out)?;
                if self.tables.remove(name).is_none() {
                    return Err(table_not_found().into());
                }
                self.session_mut(session)?.changes.push(Change {
                    table: name.clone(),
                    event: ObjectEvent::Dropped,
                    rowid: None,
                });
                self.commit(session, out)?;
            }
            Sql::Commit => self.commit(session, out)?,
            Sql::Rollback => self.rollback(session)?,
            Sql::Select(select) => {
                let binds = Binds {
                    values: &binds,
                    iteration: 0,
                };
                let result = self.query(select, &binds)?;
                self.stmt_mut(stmt)?.result = Some(result);
            }
            Sql::Insert { .. } | Sql::Update { .. } | Sql::Delete { .. } => {
                return self.execute_dml(session, stmt, sql, &binds, iters, mode.batch_errors);
            }
            Sql::Block(_) => return Err(ora(code::INVALID_SQL, "invalid SQL statement").into()),
        }
        Ok(Status::Success)
    }

    fn create_table(&mut self, name: &str, columns: &[ColumnDef]) -> Res<()> {
        if self.tables.contains_key(name) {
            return Err(ora(code::NAME_ALREADY_USED, "name is already used by an existing object").into());
        }
        let mut seen = HashSet::new();
        let mut defs = Vec::with_capacity(columns.len());
        for column in columns {
            if !seen.insert(column.name.as_str()) {
                return Err(ora(957, "duplicate column name").into());
            }
            let mut def = column.clone();
            match &column.ty {
                // named types are resolved against the collection registry first
                ColType::Object(type_name) if self.coll_types.contains_key(type_name) => {
                    def.ty = ColType::Collection(type_name.clone());
                }
                ColType::Ref(type_name) | ColType::Object(type_name) if !self.types.contains_key(type_name) => {
                    return Err(ora(code::INVALID_DATATYPE, "invalid datatype").into());
                }
                _ => {}
            }
            defs.push(def);
        }
        self.tables.insert(
            name.to_string(),
            Table {
                columns: defs,
                rows: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn execute_dml(
        &mut self,
        session: u64,
        stmt: u64,
        sql: &Sql,
        binds: &HashMap<String, Vec<Datum>>,
        iters: u32,
        batch_errors: bool,
    ) -> Res<Status> {
        let iters = iters.max(1) as usize;
        let mut count = 0;
        let mut errors = Vec::new();

        for iteration in 0..iters {
            let binds = Binds {
                values: binds,
                iteration,
            };
            let row = iteration as u32 + 1;
            match self.dml_once(session, stmt, sql, &binds) {
                Ok(n) => count += n,
                Err(Fault::Diag(d)) if batch_errors => errors.push(d.at_row(row)),
                Err(Fault::Diag(d)) => {
                    self.stmt_mut(stmt)?.row_count = count;
                    return Err(if iters > 1 { d.at_row(row) } else { d }.into());
                }
                Err(fault) => return Err(fault),
            }
        }

        let body = self.stmt_mut(stmt)?;
        body.row_count = count;
        body.batch_errors = errors;
        Ok(Status::Success)
    }

    fn dml_once(&mut self, session: u64, stmt: u64, sql: &Sql, binds: &Binds<'_>) -> Res<u64> {
        match sql {
            Sql::Insert {
                table,
                columns,
                values,
                returning,
            } => self.insert_row(session, stmt, table, columns.as_deref(), values, returning.as_ref(), binds),
            Sql::Update {
                table,
                sets,
                filter,
                returning,
            } => self.update_rows(session, stmt, table, sets, filter, returning.as_ref(), binds),
            Sql::Delete { table, filter } => self.delete_rows(session, table, filter, binds),
            _ => Err(ora(code::INVALID_SQL, "invalid SQL statement").into()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_row(
        &mut self,
        session: u64,
        stmt: u64,
        table: &str,
        columns: Option<&[String]>,
        values: &[Expr],
        returning: Option<&Returning>,
        binds: &Binds<'_>,
    ) -> Res<u64> {
        let defs = self.tables.get(table).ok_or_else(table_not_found)?.columns.clone();
        let targets = match columns {
            Some(names) => names
                .iter()
                .map(|n| column_index(&defs, n))
                .collect::<SqlResult<Vec<_>>>()?,
            None => (0..defs.len()).collect(),
        };
        if values.len() < targets.len() {
            return Err(ora(code::VALUES_MISMATCH, "not enough values").into());
        }
        if values.len() > targets.len() {
            return Err(ora(913, "too many values").into());
        }

        let scope = RowScope {
            binds,
            columns: &defs,
            cells: None,
        };
        let mut cells = vec![Cell::null(); defs.len()];
        for (expr, &idx) in values.iter().zip(&targets) {
            cells[idx] = self.expr_cell(expr, &defs[idx], table, &scope)?;
        }
        self.check_row(table, &defs, &cells, None)?;

        let rowid = self.next_id();
        self.tables
            .get_mut(table)
            .ok_or_else(table_not_found)?
            .rows
            .insert(rowid, cells.clone());
        let s = self.session_mut(session)?;
        s.undo.push(Undo::Insert {
            table: table.to_string(),
            rowid,
        });
        s.changes.push(Change {
            table: table.to_string(),
            event: ObjectEvent::Inserted,
            rowid: Some(rowid),
        });

        if let Some(returning) = returning {
            self.returning(stmt, returning, &defs, &cells, binds)?;
        }
        Ok(1)
    }

    #[allow(clippy::too_many_arguments)]
    fn update_rows(
        &mut self,
        session: u64,
        stmt: u64,
        table: &str,
        sets: &[(String, Expr)],
        filter: &[Cond],
        returning: Option<&Returning>,
        binds: &Binds<'_>,
    ) -> Res<u64> {
        let (defs, matched) = {
            let t = self.tables.get(table).ok_or_else(table_not_found)?;
            let rows = filter_rows(&t.columns, t.rows.iter().map(|(k, v)| (*k, v)), filter, binds)?;
            (t.columns.clone(), rows)
        };
        let targets = sets
            .iter()
            .map(|(name, _)| column_index(&defs, name))
            .collect::<SqlResult<Vec<_>>>()?;

        let mut updated = Vec::with_capacity(matched.len());
        for (rowid, old) in matched {
            let mut new = old.clone();
            {
                let scope = RowScope {
                    binds,
                    columns: &defs,
                    cells: Some(old.as_slice()),
                };
                for ((_, expr), &idx) in sets.iter().zip(&targets) {
                    new[idx] = self.expr_cell(expr, &defs[idx], table, &scope)?;
                }
            }
            self.check_row(table, &defs, &new, Some(rowid))?;
            updated.push((rowid, old, new));
        }

        let t = self.tables.get_mut(table).ok_or_else(table_not_found)?;
        for (rowid, _, new) in &updated {
            t.rows.insert(*rowid, new.clone());
        }
        let count = updated.len() as u64;
        let last = updated.last().map(|(_, _, new)| new.clone());
        let s = self.session_mut(session)?;
        for (rowid, old, _) in updated {
            s.undo.push(Undo::Update {
                table: table.to_string(),
                rowid,
                old,
            });
            s.changes.push(Change {
                table: table.to_string(),
                event: ObjectEvent::Updated,
                rowid: Some(rowid),
            });
        }

        if let (Some(returning), Some(cells)) = (returning, last) {
            self.returning(stmt, returning, &defs, &cells, binds)?;
        }
        Ok(count)
    }

    fn delete_rows(&mut self, session: u64, table: &str, filter: &[Cond], binds: &Binds<'_>) -> Res<u64> {
        let t = self.tables.get_mut(table).ok_or_else(table_not_found)?;
        let matched = filter_rows(&t.columns, t.rows.iter().map(|(k, v)| (*k, v)), filter, binds)?;
        for (rowid, _) in &matched {
            t.rows.remove(rowid);
        }
        let count = matched.len() as u64;
        let s = self.session_mut(session)?;
        for (rowid, old) in matched {
            s.undo.push(Undo::Delete {
                table: table.to_string(),
                rowid,
                old,
            });
            s.changes.push(Change {
                table: table.to_string(),
                event: ObjectEvent::Deleted,
                rowid: Some(rowid),
            });
        }
        Ok(count)
    }

    fn expr_cell(&mut self, expr: &Expr, def: &ColumnDef, table: &str, scope: &RowScope<'_>) -> Res<Cell> {
        let datum = eval_with(expr, scope)?;
        let cell = self.datum_cell(&datum, def.ty.data_type(), def.ty.type_name())?;
        let too_large = |actual: usize, maximum: u32| -> Res<Cell> {
            Err(ora(
                code::VALUE_TOO_LARGE,
                format!(
                    "value too large for column \"{}\".\"{}\" (actual: {}, maximum: {})",
                    table, def.name, actual, maximum
                ),
            )
            .into())
        };
        match (&def.ty, &cell) {
            (ColType::Varchar(max), Cell::Value(Datum::Text(t))) if t.chars().count() > *max as usize => {
                too_large(t.chars().count(), *max)
            }
            (ColType::Raw(max), Cell::Value(Datum::Raw(b))) if b.len() > *max as usize => too_large(b.len(), *max),
            _ => Ok(cell),
        }
    }

    fn check_row(&self, table: &str, defs: &[ColumnDef], cells: &[Cell], skip: Option<u64>) -> Res<()> {
        for (def, cell) in defs.iter().zip(cells) {
            if (def.not_null || def.primary_key) && cell.is_null() {
                return Err(ora(
                    code::CANNOT_INSERT_NULL,
                    format!("cannot insert NULL into (\"{}\".\"{}\")", table, def.name),
                )
                .into());
            }
        }
        let key: Vec<usize> = defs
            .iter()
            .enumerate()
            .filter(|(_, d)| d.primary_key)
            .map(|(i, _)| i)
            .collect();
        if key.is_empty() {
            return Ok(());
        }
        let t = self.tables.get(table).ok_or_else(table_not_found)?;
        let duplicate = t
            .rows
            .iter()
            .filter(|(rowid, _)| Some(**rowid) != skip)
            .any(|(_, row)| key.iter().all(|&i| row[i] == cells[i]));
        if duplicate {
            return Err(ora(
                code::UNIQUE_CONSTRAINT,
                format!("unique constraint ({}_PK) violated", table),
            )
            .into());
        }
        Ok(())
    }

    fn returning(
        &mut self,
        stmt: u64,
        returning: &Returning,
        defs: &[ColumnDef],
        cells: &[Cell],
        binds: &Binds<'_>,
    ) -> Res<()> {
        for (expr, into) in returning.exprs.iter().zip(&returning.into) {
            let datum = match expr {
                Expr::Column(name) => {
                    let idx = column_index(defs, name)?;
                    let (datum, raw) = self.cell_datum(&cells[idx], stmt, true)?;
                    if let Some(raw) = raw {
                        self.stmt_mut(stmt)?.scratch.push(raw);
                    }
                    datum
                }
                other => {
                    let scope = RowScope {
                        binds,
                        columns: defs,
                        cells: Some(cells),
                    };
                    sql::eval(other, &scope)?
                }
            };
            self.stmt_mut(stmt)?.outs.insert(into.clone(), datum);
        }
        Ok(())
    }

    fn query(&mut self, select: &Select, binds: &Binds<'_>) -> Res<Materialized> {
        let dual;
        let (defs, mut rows) = match &select.table {
            Some(name) => {
                let t = self.tables.get(name).ok_or_else(table_not_found)?;
                let rows = filter_rows(&t.columns, t.rows.iter().map(|(k, v)| (*k, v)), &select.filter, binds)?;
                (t.columns.clone(), rows)
            }
            None => {
                let columns = vec![ColumnDef {
                    name: "DUMMY".to_string(),
                    ty: ColType::Varchar(1),
                    primary_key: false,
                    not_null: false,
                }];
                dual = vec![Cell::Value(Datum::Text("X".to_string()))];
                let rows = filter_rows(&columns, std::iter::once((0, &dual)), &select.filter, binds)?;
                (columns, rows)
            }
        };

        if !select.order_by.is_empty() {
            let keys = select
                .order_by
                .iter()
                .map(|(name, descending)| column_index(&defs, name).map(|i| (i, *descending)))
                .collect::<SqlResult<Vec<_>>>()?;
            for (_, cells) in &rows {
                for (i, _) in &keys {
                    if !matches!(cells[*i], Cell::Value(_)) {
                        return Err(sql::inconsistent().into());
                    }
                }
            }
            rows.sort_by(|(_, a), (_, b)| {
                for (i, descending) in &keys {
                    let ordering = match (&a[*i], &b[*i]) {
                        (Cell::Value(x), Cell::Value(y)) => order_datums(x, y),
                        _ => Ordering::Equal,
                    };
                    let ordering = if *descending { ordering.reverse() } else { ordering };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        if let Some(SelectItem::Count(name)) = select.items.iter().find(|i| matches!(i, SelectItem::Count(_))) {
            if select.items.len() != 1 {
                return Err(ora(code::NOT_SINGLE_GROUP, "not a single-group group function").into());
            }
            let mut desc = ColumnDesc::new(name.clone(), DataType::Numeric);
            desc.size = 22;
            desc.nullable = false;
            return Ok(Materialized {
                columns: vec![desc],
                rows: vec![vec![Cell::Value(Datum::Integer(rows.len() as i64))]],
                position: 0,
                current: None,
            });
        }

        let mut columns: Vec<(String, Option<ColumnDesc>)> = Vec::new();
        let mut getters = Vec::new();
        for item in &select.items {
            match item {
                SelectItem::Star => {
                    for (i, def) in defs.iter().enumerate() {
                        columns.push((def.name.clone(), Some(describe(def))));
                        getters.push(Getter::Column(i));
                    }
                }
                SelectItem::Expr {
                    expr: Expr::Column(column),
                    name,
                } => {
                    let i = column_index(&defs, column)?;
                    let mut desc = describe(&defs[i]);
                    desc.name = name.clone();
                    columns.push((name.clone(), Some(desc)));
                    getters.push(Getter::Column(i));
                }
                SelectItem::Expr { expr, name } => {
                    columns.push((name.clone(), None));
                    getters.push(Getter::Expr(expr.clone()));
                }
                SelectItem::Count(_) => {}
            }
        }

        let mut out_rows = Vec::with_capacity(rows.len());
        for (_, cells) in &rows {
            let mut out = Vec::with_capacity(getters.len());
            for (i, getter) in getters.iter().enumerate() {
                match getter {
                    Getter::Column(idx) => out.push(cells[*idx].clone()),
                    Getter::Expr(expr) => {
                        let datum = {
                            let scope = RowScope {
                                binds,
                                columns: &defs,
                                cells: Some(cells.as_slice()),
                            };
                            eval_with(expr, &scope)?
                        };
                        let (cell, mut desc) = self.free_cell(&datum)?;
                        if columns[i].1.is_none() && !datum.is_null() {
                            desc.name = columns[i].0.clone();
                            columns[i].1 = Some(desc);
                        }
                        out.push(cell);
                    }
                }
            }
            out_rows.push(out);
        }

        let columns = columns
            .into_iter()
            .map(|(name, desc)| desc.unwrap_or_else(|| ColumnDesc::new(name, DataType::Text)))
            .collect();
        Ok(Materialized {
            columns,
            rows: out_rows,
            position: 0,
            current: None,
        })
    }
}

