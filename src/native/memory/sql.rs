//! SQL dialect understood by the emulated client
//!
//! A small subset: table DDL, single-table DML with optional `RETURNING`,
//! single-table queries with `WHERE`/`ORDER BY`, and anonymous PL/SQL blocks
//! made of bind assignments, sleeps and application errors.

use std::cmp::Ordering;
use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime};

use super::ora;
use crate::constants::ora as code;
use crate::native::{DataType, Datum, Diagnostic};
use crate::types::{Interval, IntervalKind};

pub(crate) type SqlResult<T> = std::result::Result<T, Diagnostic>;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Number(String),
    Str(String),
    Bind(String),
    Sym(&'static str),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => f.write_str(w),
            Token::Quoted(w) => write!(f, "\"{}\"", w),
            Token::Number(n) => f.write_str(n),
            Token::Str(s) => write!(f, "'{}'", s),
            Token::Bind(b) => write!(f, ":{}", b),
            Token::Sym(s) => f.write_str(s),
        }
    }
}

const SYMBOLS: &[&str] = &[
    ":=", "<>", "!=", "<=", ">=", "||", "(", ")", ",", ";", "*", "+", "-", "/", "=", "<", ">", ".",
];

fn tokenize(sql: &str) -> SqlResult<Vec<Token>> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '-' && chars.get(i + 1) == Some(&'-') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                i += 1;
            }
            i += 2;
            continue;
        }
        if c == '\'' {
            let mut text = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(ora(1756, "quoted string not properly terminated")),
                    Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                        text.push('\'');
                        i += 2;
                    }
                    Some('\'') => {
                        i += 1;
                        break;
                    }
                    Some(&ch) => {
                        text.push(ch);
                        i += 1;
                    }
                }
            }
            tokens.push(Token::Str(text));
            continue;
        }
        if c == '"' {
            let start = i + 1;
            let end = chars[start..]
                .iter()
                .position(|&ch| ch == '"')
                .map(|p| start + p)
                .ok_or_else(|| ora(1740, "missing double quote in identifier"))?;
            tokens.push(Token::Quoted(chars[start..end].iter().collect()));
            i = end + 1;
            continue;
        }
        if c == ':' && chars.get(i + 1) != Some(&'=') {
            i += 1;
            let name = if chars.get(i) == Some(&'"') {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&ch| ch == '"')
                    .map(|p| start + p)
                    .ok_or_else(|| ora(1740, "missing double quote in identifier"))?;
                i = end + 1;
                chars[start..end].iter().collect()
            } else {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$' || chars[i] == '#') {
                    i += 1;
                }
                chars[start..i].iter().collect::<String>().to_uppercase()
            };
            if name.is_empty() {
                return Err(ora(code::ILLEGAL_VARIABLE, "illegal variable name/number"));
            }
            tokens.push(Token::Bind(name));
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).map_or(false, |d| d.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                i += 1;
                if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
                    i += 1;
                }
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            tokens.push(Token::Number(chars[start..i].iter().collect()));
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$' || chars[i] == '#') {
                i += 1;
            }
            tokens.push(Token::Word(chars[start..i].iter().collect::<String>().to_uppercase()));
            continue;
        }
        let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
        match SYMBOLS.iter().find(|s| rest.starts_with(**s)) {
            Some(sym) => {
                tokens.push(Token::Sym(sym));
                i += sym.chars().count();
            }
            None => return Err(ora(911, "invalid character")),
        }
    }
    Ok(tokens)
}

// -----------------------------------------------------------------------------
// Statement tree
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ColType {
    Number { precision: i16, scale: i16 },
    Varchar(u32),
    Date,
    Timestamp,
    TimestampTz,
    Interval(IntervalKind),
    Raw(u32),
    Boolean,
    Double,
    Clob,
    Blob,
    Object(String),
    Ref(String),
    Collection(String),
}

impl ColType {
    pub(crate) fn data_type(&self) -> DataType {
        match self {
            ColType::Number { .. } => DataType::Numeric,
            ColType::Varchar(_) => DataType::Text,
            ColType::Date => DataType::Date,
            ColType::Timestamp => DataType::Timestamp,
            ColType::TimestampTz => DataType::TimestampTz,
            ColType::Interval(_) => DataType::Interval,
            ColType::Raw(_) => DataType::Raw,
            ColType::Boolean => DataType::Boolean,
            ColType::Double => DataType::Double,
            ColType::Clob => DataType::Clob,
            ColType::Blob => DataType::Blob,
            ColType::Object(_) => DataType::Object,
            ColType::Ref(_) => DataType::Reference,
            ColType::Collection(_) => DataType::Collection,
        }
    }

    pub(crate) fn size(&self) -> u32 {
        match self {
            ColType::Number { .. } => 22,
            ColType::Varchar(n) | ColType::Raw(n) => *n,
            ColType::Date => 7,
            ColType::Timestamp => 11,
            ColType::TimestampTz => 13,
            ColType::Interval(IntervalKind::YearToMonth) => 5,
            ColType::Interval(IntervalKind::DayToSecond) => 11,
            ColType::Boolean => 1,
            ColType::Double => 8,
            ColType::Clob | ColType::Blob => 4000,
            ColType::Object(_) | ColType::Ref(_) | ColType::Collection(_) => 0,
        }
    }

    pub(crate) fn type_name(&self) -> Option<&str> {
        match self {
            ColType::Object(name) | ColType::Ref(name) | ColType::Collection(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ColumnDef {
    pub name: String,
    pub ty: ColType,
    pub primary_key: bool,
    pub not_null: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Concat,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Datum),
    Bind(String),
    Column(String),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Sysdate,
    Systimestamp,
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Datum::Null) => f.write_str("NULL"),
            Expr::Literal(Datum::Text(s)) => write!(f, "'{}'", s),
            Expr::Literal(Datum::Integer(i)) => write!(f, "{}", i),
            Expr::Literal(Datum::Double(d)) => write!(f, "{}", d),
            Expr::Literal(Datum::Boolean(b)) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            Expr::Literal(other) => write!(f, "{:?}", other),
            Expr::Bind(name) => write!(f, ":{}", name),
            Expr::Column(name) => f.write_str(name),
            Expr::Neg(e) => write!(f, "-{}", e),
            Expr::Binary(op, l, r) => {
                let op = match op {
                    BinOp::Add => "+",
                    BinOp::Sub => "-",
                    BinOp::Mul => "*",
                    BinOp::Div => "/",
                    BinOp::Concat => "||",
                };
                write!(f, "{}{}{}", l, op, r)
            }
            Expr::Sysdate => f.write_str("SYSDATE"),
            Expr::Systimestamp => f.write_str("SYSTIMESTAMP"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Cond {
    pub left: Expr,
    pub op: CmpOp,
    pub right: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SelectItem {
    Star,
    Count(String),
    Expr { expr: Expr, name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Select {
    pub items: Vec<SelectItem>,
    pub table: Option<String>,
    pub filter: Vec<Cond>,
    pub order_by: Vec<(String, bool)>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Returning {
    pub exprs: Vec<Expr>,
    pub into: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PlStmt {
    Assign(String, Expr),
    Sleep(Expr),
    Raise(i32, Expr),
    /// DBMS_OUTPUT.ENABLE, with the buffer size expression if given
    OutputEnable(Option<Expr>),
    OutputDisable,
    PutLine(Expr),
    /// DBMS_OUTPUT.GET_LINE into two placeholders
    GetLine { line: String, status: String },
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Sql {
    CreateTable {
        name: String,
        columns: Vec<ColumnDef>,
    },
    DropTable {
        name: String,
    },
    Insert {
        table: String,
        columns: Option<Vec<String>>,
        values: Vec<Expr>,
        returning: Option<Returning>,
    },
    Update {
        table: String,
        sets: Vec<(String, Expr)>,
        filter: Vec<Cond>,
        returning: Option<Returning>,
    },
    Delete {
        table: String,
        filter: Vec<Cond>,
    },
    Select(Select),
    Block(Vec<PlStmt>),
    Commit,
    Rollback,
}

impl Sql {
    /// Placeholders the statement reads or writes, in order of appearance
    pub(crate) fn binds(&self) -> Vec<String> {
        fn push(name: &str, out: &mut Vec<String>) {
            if !out.iter().any(|n| n == name) {
                out.push(name.to_string());
            }
        }
        fn walk(expr: &Expr, out: &mut Vec<String>) {
            match expr {
                Expr::Bind(name) => push(name, out),
                Expr::Neg(e) => walk(e, out),
                Expr::Binary(_, l, r) => {
                    walk(l, out);
                    walk(r, out);
                }
                _ => {}
            }
        }
        fn walk_filter(filter: &[Cond], out: &mut Vec<String>) {
            for cond in filter {
                walk(&cond.left, out);
                if let Some(right) = &cond.right {
                    walk(right, out);
                }
            }
        }

        let mut out = Vec::new();
        match self {
            Sql::Insert { values, returning, .. } => {
                values.iter().for_each(|e| walk(e, &mut out));
                if let Some(r) = returning {
                    r.exprs.iter().for_each(|e| walk(e, &mut out));
                }
            }
            Sql::Update {
                sets,
                filter,
                returning,
                ..
            } => {
                sets.iter().for_each(|(_, e)| walk(e, &mut out));
                walk_filter(filter, &mut out);
                if let Some(r) = returning {
                    r.exprs.iter().for_each(|e| walk(e, &mut out));
                }
            }
            Sql::Delete { filter, .. } => walk_filter(filter, &mut out),
            Sql::Select(select) => {
                for item in &select.items {
                    if let SelectItem::Expr { expr, .. } = item {
                        walk(expr, &mut out);
                    }
                }
                walk_filter(&select.filter, &mut out);
            }
            Sql::Block(stmts) => {
                for stmt in stmts {
                    match stmt {
                        PlStmt::Assign(_, expr)
                        | PlStmt::Sleep(expr)
                        | PlStmt::Raise(_, expr)
                        | PlStmt::PutLine(expr)
                        | PlStmt::OutputEnable(Some(expr)) => walk(expr, &mut out),
                        PlStmt::OutputEnable(None) | PlStmt::OutputDisable | PlStmt::GetLine { .. } | PlStmt::Null => {}
                    }
                }
            }
            _ => {}
        }
        for name in self.out_binds() {
            push(&name, &mut out);
        }
        out
    }

    /// Placeholders written by the statement
    pub(crate) fn out_binds(&self) -> Vec<String> {
        match self {
            Sql::Insert {
                returning: Some(r), ..
            }
            | Sql::Update {
                returning: Some(r), ..
            } => r.into.clone(),
            Sql::Block(stmts) => stmts
                .iter()
                .flat_map(|s| match s {
                    PlStmt::Assign(name, _) => vec![name.clone()],
                    PlStmt::GetLine { line, status } => vec![line.clone(), status.clone()],
                    _ => Vec::new(),
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn is_query(&self) -> bool {
        matches!(self, Sql::Select(_))
    }

    pub(crate) fn is_ddl(&self) -> bool {
        matches!(self, Sql::CreateTable { .. } | Sql::DropTable { .. })
    }
}

// -----------------------------------------------------------------------------
// Parser
// -----------------------------------------------------------------------------

pub(crate) fn parse(sql: &str) -> SqlResult<Sql> {
    let tokens = tokenize(sql)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        is_block: false,
    };
    let stmt = parser.statement()?;
    if parser.is_block {
        parser.accept_sym(";");
    }
    if let Some(token) = parser.peek() {
        return Err(ora(
            code::SQL_NOT_PROPERLY_ENDED,
            format!("SQL command not properly ended near '{}'", token),
        ));
    }
    Ok(stmt)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    is_block: bool,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w == word)
    }

    fn accept_word(&mut self, word: &str) -> bool {
        if self.peek_word(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_word(&mut self, word: &str) -> SqlResult<()> {
        if self.accept_word(word) {
            Ok(())
        } else {
            Err(ora(code::MISSING_KEYWORD, format!("missing keyword {}", word)))
        }
    }

    fn accept_sym(&mut self, sym: &str) -> bool {
        if matches!(self.peek(), Some(Token::Sym(s)) if *s == sym) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_sym(&mut self, sym: &str) -> SqlResult<()> {
        if self.accept_sym(sym) {
            Ok(())
        } else {
            let near = self.peek().map(|t| t.to_string()).unwrap_or_default();
            Err(ora(code::MISSING_EXPRESSION, format!("expected '{}' near '{}'", sym, near)))
        }
    }

    fn ident(&mut self) -> SqlResult<String> {
        match self.next() {
            Some(Token::Word(w)) | Some(Token::Quoted(w)) => Ok(w),
            other => Err(ora(
                code::INVALID_IDENTIFIER,
                format!("invalid identifier near '{}'", other.map(|t| t.to_string()).unwrap_or_default()),
            )),
        }
    }

    /// Identifier with an optional schema prefix, which is dropped
    fn object_name(&mut self) -> SqlResult<String> {
        let mut name = self.ident()?;
        if self.accept_sym(".") {
            name = self.ident()?;
        }
        Ok(name)
    }

    fn bind(&mut self) -> SqlResult<String> {
        match self.next() {
            Some(Token::Bind(name)) => Ok(name),
            _ => Err(ora(code::ILLEGAL_VARIABLE, "illegal variable name/number")),
        }
    }

    fn integer(&mut self) -> SqlResult<i64> {
        let negative = self.accept_sym("-");
        match self.next() {
            Some(Token::Number(n)) => n
                .parse::<i64>()
                .map(|v| if negative { -v } else { v })
                .map_err(|_| ora(1722, "invalid number")),
            _ => Err(ora(1722, "invalid number")),
        }
    }

    fn statement(&mut self) -> SqlResult<Sql> {
        match self.peek() {
            Some(Token::Word(w)) => match w.as_str() {
                "CREATE" => self.create(),
                "DROP" => self.drop_table(),
                "INSERT" => self.insert(),
                "UPDATE" => self.update(),
                "DELETE" => self.delete(),
                "SELECT" => self.select().map(Sql::Select),
                "BEGIN" | "DECLARE" => self.block(),
                "COMMIT" => {
                    self.pos += 1;
                    self.accept_word("WORK");
                    Ok(Sql::Commit)
                }
                "ROLLBACK" => {
                    self.pos += 1;
                    self.accept_word("WORK");
                    Ok(Sql::Rollback)
                }
                _ => Err(ora(code::INVALID_SQL, "invalid SQL statement")),
            },
            _ => Err(ora(code::INVALID_SQL, "invalid SQL statement")),
        }
    }

    fn create(&mut self) -> SqlResult<Sql> {
        self.expect_word("CREATE")?;
        self.expect_word("TABLE")?;
        let name = self.object_name()?;
        self.expect_sym("(")?;
        let mut columns = Vec::new();
        loop {
            if self.accept_word("PRIMARY") {
                self.expect_word("KEY")?;
                self.expect_sym("(")?;
                let key = self.ident()?;
                self.expect_sym(")")?;
                match columns.iter_mut().find(|c: &&mut ColumnDef| c.name == key) {
                    Some(column) => column.primary_key = true,
                    None => return Err(ora(code::INVALID_IDENTIFIER, format!("\"{}\": invalid identifier", key))),
                }
            } else {
                columns.push(self.column_def()?);
            }
            if !self.accept_sym(",") {
                break;
            }
        }
        self.expect_sym(")")?;
        Ok(Sql::CreateTable { name, columns })
    }

    fn column_def(&mut self) -> SqlResult<ColumnDef> {
        let name = self.ident()?;
        let ty = self.col_type()?;
        let mut def = ColumnDef {
            name,
            ty,
            primary_key: false,
            not_null: false,
        };
        loop {
            if self.accept_word("PRIMARY") {
                self.expect_word("KEY")?;
                def.primary_key = true;
            } else if self.accept_word("NOT") {
                self.expect_word("NULL")?;
                def.not_null = true;
            } else if self.accept_word("NULL") {
                def.not_null = false;
            } else {
                break;
            }
        }
        Ok(def)
    }

    fn size_spec(&mut self) -> SqlResult<Option<(i64, Option<i64>)>> {
        if !self.accept_sym("(") {
            return Ok(None);
        }
        let first = self.integer()?;
        let second = if self.accept_sym(",") { Some(self.integer()?) } else { None };
        // VARCHAR2(10 CHAR)
        let _ = self.accept_word("CHAR") || self.accept_word("BYTE");
        self.expect_sym(")")?;
        Ok(Some((first, second)))
    }

    fn col_type(&mut self) -> SqlResult<ColType> {
        let word = self.ident()?;
        let ty = match word.as_str() {
            "NUMBER" | "NUMERIC" | "DECIMAL" => match self.size_spec()? {
                Some((p, s)) => ColType::Number {
                    precision: p as i16,
                    scale: s.unwrap_or(0) as i16,
                },
                None => ColType::Number { precision: 0, scale: -127 },
            },
            "INTEGER" | "INT" | "SMALLINT" => ColType::Number { precision: 38, scale: 0 },
            "VARCHAR2" | "VARCHAR" | "NVARCHAR2" | "CHAR" | "NCHAR" => {
                let size = self.size_spec()?.map(|(n, _)| n).unwrap_or(1);
                ColType::Varchar(size as u32)
            }
            "DATE" => ColType::Date,
            "TIMESTAMP" => {
                self.size_spec()?;
                if self.accept_word("WITH") {
                    let _ = self.accept_word("LOCAL");
                    self.expect_word("TIME")?;
                    self.expect_word("ZONE")?;
                    ColType::TimestampTz
                } else {
                    ColType::Timestamp
                }
            }
            "INTERVAL" => {
                if self.accept_word("YEAR") {
                    self.size_spec()?;
                    self.expect_word("TO")?;
                    self.expect_word("MONTH")?;
                    ColType::Interval(IntervalKind::YearToMonth)
                } else {
                    self.expect_word("DAY")?;
                    self.size_spec()?;
                    self.expect_word("TO")?;
                    self.expect_word("SECOND")?;
                    self.size_spec()?;
                    ColType::Interval(IntervalKind::DayToSecond)
                }
            }
            "RAW" => ColType::Raw(self.size_spec()?.map(|(n, _)| n).unwrap_or(2000) as u32),
            "BOOLEAN" => ColType::Boolean,
            "BINARY_DOUBLE" | "BINARY_FLOAT" | "FLOAT" => ColType::Double,
            "CLOB" | "NCLOB" => ColType::Clob,
            "BLOB" => ColType::Blob,
            "REF" => ColType::Ref(self.object_name()?),
            other => {
                let mut name = other.to_string();
                if self.accept_sym(".") {
                    name = self.ident()?;
                }
                ColType::Object(name)
            }
        };
        Ok(ty)
    }

    fn drop_table(&mut self) -> SqlResult<Sql> {
        self.expect_word("DROP")?;
        self.expect_word("TABLE")?;
        let name = self.object_name()?;
        self.accept_word("PURGE");
        Ok(Sql::DropTable { name })
    }

    fn insert(&mut self) -> SqlResult<Sql> {
        self.expect_word("INSERT")?;
        self.expect_word("INTO")?;
        let table = self.object_name()?;
        let columns = if self.accept_sym("(") {
            let mut cols = vec![self.ident()?];
            while self.accept_sym(",") {
                cols.push(self.ident()?);
            }
            self.expect_sym(")")?;
            Some(cols)
        } else {
            None
        };
        self.expect_word("VALUES")?;
        self.expect_sym("(")?;
        let values = self.expr_list()?;
        self.expect_sym(")")?;
        let returning = self.returning()?;
        Ok(Sql::Insert {
            table,
            columns,
            values,
            returning,
        })
    }

    fn update(&mut self) -> SqlResult<Sql> {
        self.expect_word("UPDATE")?;
        let table = self.object_name()?;
        self.expect_word("SET")?;
        let mut sets = Vec::new();
        loop {
            let column = self.ident()?;
            self.expect_sym("=")?;
            sets.push((column, self.expr()?));
            if !self.accept_sym(",") {
                break;
            }
        }
        let filter = self.filter()?;
        let returning = self.returning()?;
        Ok(Sql::Update {
            table,
            sets,
            filter,
            returning,
        })
    }

    fn delete(&mut self) -> SqlResult<Sql> {
        self.expect_word("DELETE")?;
        self.accept_word("FROM");
        let table = self.object_name()?;
        let filter = self.filter()?;
        Ok(Sql::Delete { table, filter })
    }

    fn returning(&mut self) -> SqlResult<Option<Returning>> {
        if !(self.accept_word("RETURNING") || self.accept_word("RETURN")) {
            return Ok(None);
        }
        let exprs = self.expr_list()?;
        self.expect_word("INTO")?;
        let mut into = vec![self.bind()?];
        while self.accept_sym(",") {
            into.push(self.bind()?);
        }
        if into.len() != exprs.len() {
            return Err(ora(code::VALUES_MISMATCH, "not enough values"));
        }
        Ok(Some(Returning { exprs, into }))
    }

    fn select(&mut self) -> SqlResult<Select> {
        self.expect_word("SELECT")?;
        let mut items = Vec::new();
        loop {
            items.push(self.select_item()?);
            if !self.accept_sym(",") {
                break;
            }
        }
        self.expect_word("FROM")?;
        let name = self.object_name()?;
        let table = if name == "DUAL" { None } else { Some(name) };
        // table alias
        if let Some(Token::Word(w)) = self.peek() {
            if !matches!(w.as_str(), "WHERE" | "ORDER") {
                self.pos += 1;
            }
        }
        let filter = self.filter()?;
        let mut order_by = Vec::new();
        if self.accept_word("ORDER") {
            self.expect_word("BY")?;
            loop {
                let column = self.ident()?;
                let descending = if self.accept_word("DESC") {
                    true
                } else {
                    self.accept_word("ASC");
                    false
                };
                order_by.push((column, descending));
                if !self.accept_sym(",") {
                    break;
                }
            }
        }
        Ok(Select {
            items,
            table,
            filter,
            order_by,
        })
    }

    fn select_item(&mut self) -> SqlResult<SelectItem> {
        if self.accept_sym("*") {
            return Ok(SelectItem::Star);
        }
        if self.peek_word("COUNT") && self.tokens.get(self.pos + 1) == Some(&Token::Sym("(")) {
            self.pos += 2;
            self.expect_sym("*")?;
            self.expect_sym(")")?;
            let name = self.alias()?.unwrap_or_else(|| "COUNT(*)".to_string());
            return Ok(SelectItem::Count(name));
        }
        let expr = self.expr()?;
        let name = match self.alias()? {
            Some(alias) => alias,
            None => match &expr {
                Expr::Column(name) => name.clone(),
                other => other.to_string(),
            },
        };
        Ok(SelectItem::Expr { expr, name })
    }

    fn alias(&mut self) -> SqlResult<Option<String>> {
        if self.accept_word("AS") {
            return self.ident().map(Some);
        }
        match self.peek() {
            Some(Token::Word(w)) if w != "FROM" => {
                let alias = w.clone();
                self.pos += 1;
                Ok(Some(alias))
            }
            Some(Token::Quoted(q)) => {
                let alias = q.clone();
                self.pos += 1;
                Ok(Some(alias))
            }
            _ => Ok(None),
        }
    }

    fn filter(&mut self) -> SqlResult<Vec<Cond>> {
        let mut conds = Vec::new();
        if !self.accept_word("WHERE") {
            return Ok(conds);
        }
        loop {
            conds.push(self.cond()?);
            if !self.accept_word("AND") {
                break;
            }
        }
        Ok(conds)
    }

    fn cond(&mut self) -> SqlResult<Cond> {
        let left = self.expr()?;
        if self.accept_word("IS") {
            let op = if self.accept_word("NOT") { CmpOp::IsNotNull } else { CmpOp::IsNull };
            self.expect_word("NULL")?;
            return Ok(Cond { left, op, right: None });
        }
        let op = match self.next() {
            Some(Token::Sym("=")) => CmpOp::Eq,
            Some(Token::Sym("<>")) | Some(Token::Sym("!=")) => CmpOp::Ne,
            Some(Token::Sym("<")) => CmpOp::Lt,
            Some(Token::Sym("<=")) => CmpOp::Le,
            Some(Token::Sym(">")) => CmpOp::Gt,
            Some(Token::Sym(">=")) => CmpOp::Ge,
            _ => return Err(ora(920, "invalid relational operator")),
        };
        let right = self.expr()?;
        Ok(Cond {
            left,
            op,
            right: Some(right),
        })
    }

    fn expr_list(&mut self) -> SqlResult<Vec<Expr>> {
        let mut exprs = vec![self.expr()?];
        while self.accept_sym(",") {
            exprs.push(self.expr()?);
        }
        Ok(exprs)
    }

    fn expr(&mut self) -> SqlResult<Expr> {
        let mut left = self.term()?;
        loop {
            let op = if self.accept_sym("+") {
                BinOp::Add
            } else if self.accept_sym("-") {
                BinOp::Sub
            } else if self.accept_sym("||") {
                BinOp::Concat
            } else {
                return Ok(left);
            };
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn term(&mut self) -> SqlResult<Expr> {
        let mut left = self.factor()?;
        loop {
            let op = if self.accept_sym("*") {
                BinOp::Mul
            } else if self.accept_sym("/") {
                BinOp::Div
            } else {
                return Ok(left);
            };
            let right = self.factor()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn factor(&mut self) -> SqlResult<Expr> {
        if self.accept_sym("-") {
            return Ok(Expr::Neg(Box::new(self.factor()?)));
        }
        if self.accept_sym("+") {
            return self.factor();
        }
        if self.accept_sym("(") {
            let expr = self.expr()?;
            self.expect_sym(")")?;
            return Ok(expr);
        }
        match self.next() {
            Some(Token::Number(n)) => number_literal(&n).map(Expr::Literal),
            Some(Token::Str(s)) => Ok(Expr::Literal(Datum::Text(s))),
            Some(Token::Bind(name)) => Ok(Expr::Bind(name)),
            Some(Token::Quoted(name)) => Ok(Expr::Column(name)),
            Some(Token::Word(w)) => match w.as_str() {
                "NULL" => Ok(Expr::Literal(Datum::Null)),
                "TRUE" => Ok(Expr::Literal(Datum::Boolean(true))),
                "FALSE" => Ok(Expr::Literal(Datum::Boolean(false))),
                "SYSDATE" => Ok(Expr::Sysdate),
                "SYSTIMESTAMP" => Ok(Expr::Systimestamp),
                "DATE" if matches!(self.peek(), Some(Token::Str(_))) => {
                    let text = self.string()?;
                    let date = NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                        .map_err(|_| ora(1861, "literal does not match format string"))?;
                    Ok(Expr::Literal(Datum::Date(date.and_time(chrono::NaiveTime::MIN))))
                }
                "TIMESTAMP" if matches!(self.peek(), Some(Token::Str(_))) => {
                    let text = self.string()?;
                    let ts = NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f")
                        .map_err(|_| ora(1861, "literal does not match format string"))?;
                    Ok(Expr::Literal(Datum::Timestamp(ts)))
                }
                "INTERVAL" if matches!(self.peek(), Some(Token::Str(_))) => {
                    let text = self.string()?;
                    let interval = if self.accept_word("YEAR") {
                        self.size_spec()?;
                        self.expect_word("TO")?;
                        self.expect_word("MONTH")?;
                        text.parse::<Interval>()
                            .ok()
                            .filter(|i| i.kind() == IntervalKind::YearToMonth)
                    } else {
                        self.expect_word("DAY")?;
                        self.size_spec()?;
                        self.expect_word("TO")?;
                        self.expect_word("SECOND")?;
                        self.size_spec()?;
                        text.parse::<Interval>()
                            .ok()
                            .filter(|i| i.kind() == IntervalKind::DayToSecond)
                    };
                    interval
                        .map(|i| Expr::Literal(Datum::Interval(i)))
                        .ok_or_else(|| ora(1867, "the interval is invalid"))
                }
                _ => {
                    let mut name = w;
                    if self.accept_sym(".") {
                        name = self.ident()?;
                    }
                    Ok(Expr::Column(name))
                }
            },
            other => Err(ora(
                code::MISSING_EXPRESSION,
                format!("missing expression near '{}'", other.map(|t| t.to_string()).unwrap_or_default()),
            )),
        }
    }

    fn string(&mut self) -> SqlResult<String> {
        match self.next() {
            Some(Token::Str(s)) => Ok(s),
            _ => Err(ora(code::MISSING_EXPRESSION, "missing expression")),
        }
    }

    fn block(&mut self) -> SqlResult<Sql> {
        self.is_block = true;
        if self.accept_word("DECLARE") {
            return Err(ora(6550, "PLS-00103: declarations are not supported"));
        }
        self.expect_word("BEGIN")?;
        let mut stmts = Vec::new();
        while !self.accept_word("END") {
            if self.peek().is_none() {
                return Err(ora(6550, "PLS-00103: encountered the end of input"));
            }
            stmts.push(self.pl_statement()?);
            self.expect_sym(";")?;
        }
        Ok(Sql::Block(stmts))
    }

    fn pl_statement(&mut self) -> SqlResult<PlStmt> {
        if let Some(Token::Bind(_)) = self.peek() {
            let target = self.bind()?;
            self.expect_sym(":=")?;
            return Ok(PlStmt::Assign(target, self.expr()?));
        }
        if self.accept_word("NULL") {
            return Ok(PlStmt::Null);
        }
        let name = self.ident()?;
        let name = if self.accept_sym(".") {
            format!("{}.{}", name, self.ident()?)
        } else {
            name
        };
        match name.as_str() {
            "DBMS_SESSION.SLEEP" | "DBMS_LOCK.SLEEP" => {
                self.expect_sym("(")?;
                let seconds = self.expr()?;
                self.expect_sym(")")?;
                Ok(PlStmt::Sleep(seconds))
            }
            "DBMS_OUTPUT.ENABLE" => {
                let size = if self.accept_sym("(") {
                    let size = self.expr()?;
                    self.expect_sym(")")?;
                    Some(size)
                } else {
                    None
                };
                Ok(PlStmt::OutputEnable(size))
            }
            "DBMS_OUTPUT.DISABLE" => {
                if self.accept_sym("(") {
                    self.expect_sym(")")?;
                }
                Ok(PlStmt::OutputDisable)
            }
            "DBMS_OUTPUT.PUT_LINE" => {
                self.expect_sym("(")?;
                let text = self.expr()?;
                self.expect_sym(")")?;
                Ok(PlStmt::PutLine(text))
            }
            "DBMS_OUTPUT.GET_LINE" => {
                self.expect_sym("(")?;
                let line = self.bind()?;
                self.expect_sym(",")?;
                let status = self.bind()?;
                self.expect_sym(")")?;
                Ok(PlStmt::GetLine { line, status })
            }
            "RAISE_APPLICATION_ERROR" => {
                self.expect_sym("(")?;
                let number = self.integer()?;
                self.expect_sym(",")?;
                let message = self.expr()?;
                self.expect_sym(")")?;
                if !(-20999..=-20000).contains(&number) {
                    return Err(ora(21000, "error number argument to raise_application_error is out of range"));
                }
                Ok(PlStmt::Raise(number as i32, message))
            }
            other => Err(ora(6550, format!("PLS-00201: identifier '{}' must be declared", other))),
        }
    }
}

fn number_literal(text: &str) -> SqlResult<Datum> {
    if let Ok(v) = text.parse::<i64>() {
        return Ok(Datum::Integer(v));
    }
    text.parse::<f64>()
        .map(Datum::Double)
        .map_err(|_| ora(1722, "invalid number"))
}

// -----------------------------------------------------------------------------
// Evaluation
// -----------------------------------------------------------------------------

/// Name resolution for expression evaluation
pub(crate) trait Scope {
    fn bind(&self, name: &str) -> SqlResult<Datum>;
    fn column(&self, name: &str) -> SqlResult<Datum>;
}

pub(crate) fn eval(expr: &Expr, scope: &dyn Scope) -> SqlResult<Datum> {
    match expr {
        Expr::Literal(d) => Ok(d.clone()),
        Expr::Bind(name) => scope.bind(name),
        Expr::Column(name) => scope.column(name),
        Expr::Sysdate => Ok(Datum::Date(now_seconds())),
        Expr::Systimestamp => Ok(Datum::TimestampTz(chrono::Local::now().fixed_offset())),
        Expr::Neg(inner) => match eval(inner, scope)? {
            Datum::Null => Ok(Datum::Null),
            Datum::Integer(i) => i
                .checked_neg()
                .map(Datum::Integer)
                .ok_or_else(|| ora(1426, "numeric overflow")),
            Datum::Double(d) => Ok(Datum::Double(-d)),
            Datum::Text(t) => match to_number(&t)? {
                Datum::Integer(i) => Ok(Datum::Integer(-i)),
                Datum::Double(d) => Ok(Datum::Double(-d)),
                other => Ok(other),
            },
            _ => Err(inconsistent()),
        },
        Expr::Binary(op, l, r) => binary(*op, eval(l, scope)?, eval(r, scope)?),
    }
}

pub(crate) fn now_seconds() -> NaiveDateTime {
    let now = chrono::Local::now().naive_local();
    now - Duration::nanoseconds(i64::from(chrono::Timelike::nanosecond(&now)))
}

pub(crate) fn inconsistent() -> Diagnostic {
    ora(code::INCONSISTENT_DATATYPES, "inconsistent datatypes")
}

fn to_number(text: &str) -> SqlResult<Datum> {
    number_literal(text.trim())
}

fn numeric(d: Datum) -> SqlResult<Datum> {
    match d {
        Datum::Text(t) => to_number(&t),
        Datum::Integer(_) | Datum::Double(_) | Datum::Null => Ok(d),
        _ => Err(inconsistent()),
    }
}

pub(crate) fn to_text(d: &Datum) -> SqlResult<String> {
    Ok(match d {
        Datum::Null => String::new(),
        Datum::Text(t) => t.clone(),
        Datum::Integer(i) => i.to_string(),
        Datum::Double(f) => f.to_string(),
        Datum::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Datum::Date(d) => d.format("%Y-%m-%d %H:%M:%S").to_string(),
        Datum::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        Datum::TimestampTz(ts) => ts.format("%Y-%m-%d %H:%M:%S%.6f %:z").to_string(),
        Datum::Interval(i) => i.to_string(),
        Datum::Raw(b) => hex::encode_upper(b),
        Datum::Lob(..) | Datum::Object(_) | Datum::Reference(_) | Datum::Collection(_) => return Err(inconsistent()),
    })
}

fn binary(op: BinOp, l: Datum, r: Datum) -> SqlResult<Datum> {
    if op == BinOp::Concat {
        let text = to_text(&l)? + &to_text(&r)?;
        return Ok(if text.is_empty() { Datum::Null } else { Datum::Text(text) });
    }
    if l.is_null() || r.is_null() {
        return Ok(Datum::Null);
    }
    // DATE +/- days
    if let (Datum::Date(d), BinOp::Add | BinOp::Sub) = (&l, op) {
        let days = match numeric(r)? {
            Datum::Integer(i) => i as f64,
            Datum::Double(f) => f,
            _ => return Err(inconsistent()),
        };
        let delta = Duration::milliseconds((days * 86_400_000.0).round() as i64);
        return Ok(Datum::Date(if op == BinOp::Add { *d + delta } else { *d - delta }));
    }
    match (numeric(l)?, numeric(r)?) {
        (Datum::Integer(a), Datum::Integer(b)) => {
            let overflow = || ora(1426, "numeric overflow");
            match op {
                BinOp::Add => a.checked_add(b).map(Datum::Integer).ok_or_else(overflow),
                BinOp::Sub => a.checked_sub(b).map(Datum::Integer).ok_or_else(overflow),
                BinOp::Mul => a.checked_mul(b).map(Datum::Integer).ok_or_else(overflow),
                BinOp::Div if b == 0 => Err(ora(code::DIVISOR_IS_ZERO, "divisor is equal to zero")),
                BinOp::Div if a % b == 0 => Ok(Datum::Integer(a / b)),
                BinOp::Div => Ok(Datum::Double(a as f64 / b as f64)),
                BinOp::Concat => Err(inconsistent()),
            }
        }
        (a, b) => {
            let (a, b) = (as_f64(&a)?, as_f64(&b)?);
            match op {
                BinOp::Add => Ok(Datum::Double(a + b)),
                BinOp::Sub => Ok(Datum::Double(a - b)),
                BinOp::Mul => Ok(Datum::Double(a * b)),
                BinOp::Div if b == 0.0 => Err(ora(code::DIVISOR_IS_ZERO, "divisor is equal to zero")),
                BinOp::Div => Ok(Datum::Double(a / b)),
                BinOp::Concat => Err(inconsistent()),
            }
        }
    }
}

pub(crate) fn as_f64(d: &Datum) -> SqlResult<f64> {
    match d {
        Datum::Integer(i) => Ok(*i as f64),
        Datum::Double(f) => Ok(*f),
        Datum::Text(t) => as_f64(&to_number(t)?),
        _ => Err(inconsistent()),
    }
}

/// SQL comparison; `None` when either side is NULL
pub(crate) fn compare(a: &Datum, b: &Datum) -> SqlResult<Option<Ordering>> {
    Ok(match (a, b) {
        (Datum::Null, _) | (_, Datum::Null) => None,
        (Datum::Integer(x), Datum::Integer(y)) => Some(x.cmp(y)),
        (Datum::Text(x), Datum::Text(y)) => Some(x.cmp(y)),
        (Datum::Boolean(x), Datum::Boolean(y)) => Some(x.cmp(y)),
        (Datum::Raw(x), Datum::Raw(y)) => Some(x.cmp(y)),
        (Datum::Date(x) | Datum::Timestamp(x), Datum::Date(y) | Datum::Timestamp(y)) => Some(x.cmp(y)),
        (Datum::TimestampTz(x), Datum::TimestampTz(y)) => Some(x.cmp(y)),
        (Datum::Interval(x), Datum::Interval(y)) if x.kind() == y.kind() => match x.kind() {
            IntervalKind::YearToMonth => Some(x.total_months().cmp(&y.total_months())),
            IntervalKind::DayToSecond => x.to_duration().partial_cmp(&y.to_duration()),
        },
        (
            Datum::Integer(_) | Datum::Double(_) | Datum::Text(_),
            Datum::Integer(_) | Datum::Double(_) | Datum::Text(_),
        ) => as_f64(a)?.partial_cmp(&as_f64(b)?),
        _ => return Err(inconsistent()),
    })
}

pub(crate) fn matches(cond: &Cond, scope: &dyn Scope) -> SqlResult<bool> {
    let left = eval(&cond.left, scope)?;
    let ordering = match (cond.op, &cond.right) {
        (CmpOp::IsNull, _) => return Ok(left.is_null()),
        (CmpOp::IsNotNull, _) => return Ok(!left.is_null()),
        (_, Some(right)) => compare(&left, &eval(right, scope)?)?,
        (_, None) => return Err(ora(code::MISSING_EXPRESSION, "missing expression")),
    };
    Ok(match ordering {
        None => false,
        Some(o) => match cond.op {
            CmpOp::Eq => o == Ordering::Equal,
            CmpOp::Ne => o != Ordering::Equal,
            CmpOp::Lt => o == Ordering::Less,
            CmpOp::Le => o != Ordering::Greater,
            CmpOp::Gt => o == Ordering::Greater,
            CmpOp::Ge => o != Ordering::Less,
            CmpOp::IsNull | CmpOp::IsNotNull => false,
        },
    })
}

/// Convert a scalar to the storage form of a data type
pub(crate) fn coerce(value: Datum, target: DataType) -> SqlResult<Datum> {
    let value = match (target, value) {
        (_, Datum::Null) => Datum::Null,
        (DataType::Text, v) => Datum::Text(to_text(&v)?),
        (DataType::Numeric, Datum::Boolean(b)) => Datum::Integer(i64::from(b)),
        (DataType::Numeric, v) => match numeric(v)? {
            Datum::Double(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Datum::Integer(f as i64),
            other => other,
        },
        (DataType::Double, v) => Datum::Double(as_f64(&v)?),
        (DataType::Raw, Datum::Raw(b)) => Datum::Raw(b),
        (DataType::Raw, Datum::Text(t)) => Datum::Raw(hex::decode(&t).map_err(|_| ora(1465, "invalid hex number"))?),
        (DataType::Boolean, Datum::Boolean(b)) => Datum::Boolean(b),
        (DataType::Boolean, Datum::Integer(i)) => Datum::Boolean(i != 0),
        (DataType::Date, Datum::Date(d) | Datum::Timestamp(d)) => {
            Datum::Date(d - Duration::nanoseconds(i64::from(chrono::Timelike::nanosecond(&d))))
        }
        (DataType::Date, Datum::TimestampTz(ts)) => Datum::Date(ts.naive_local()),
        (DataType::Timestamp, Datum::Date(d) | Datum::Timestamp(d)) => Datum::Timestamp(d),
        (DataType::Timestamp, Datum::TimestampTz(ts)) => Datum::Timestamp(ts.naive_local()),
        (DataType::TimestampTz, Datum::TimestampTz(ts)) => Datum::TimestampTz(ts),
        (DataType::TimestampTz, Datum::Date(d) | Datum::Timestamp(d)) => {
            Datum::TimestampTz(d.and_utc().fixed_offset())
        }
        (DataType::Interval, Datum::Interval(i)) => Datum::Interval(i),
        (DataType::Interval, Datum::Text(t)) => {
            Datum::Interval(t.parse::<Interval>().map_err(|_| ora(1867, "the interval is invalid"))?)
        }
        _ => return Err(inconsistent()),
    };
    Ok(value)
}

/// Data type of a computed value
pub(crate) fn datum_type(d: &Datum) -> DataType {
    match d {
        Datum::Null | Datum::Text(_) => DataType::Text,
        Datum::Integer(_) => DataType::Numeric,
        Datum::Double(_) => DataType::Double,
        Datum::Raw(_) => DataType::Raw,
        Datum::Boolean(_) => DataType::Boolean,
        Datum::Date(_) => DataType::Date,
        Datum::Timestamp(_) => DataType::Timestamp,
        Datum::TimestampTz(_) => DataType::TimestampTz,
        Datum::Interval(_) => DataType::Interval,
        Datum::Lob(crate::native::LobKind::Clob, _) => DataType::Clob,
        Datum::Lob(crate::native::LobKind::Blob, _) => DataType::Blob,
        Datum::Object(_) => DataType::Object,
        Datum::Reference(_) => DataType::Reference,
        Datum::Collection(_) => DataType::Collection,
    }
}
