pub mod chunk;
pub mod error;

use std::rc::Rc;

use chunk::table::Interner;
use chunk::value::{Function, Value};
use chunk::{Chunk, Instruction};
use error::CompileError;
use lexer::token::{Token, TokenKind};
use lexer::Scanner;

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < <= > >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // ()
    Primary,
}

impl Precedence {
    fn next(self) -> Self {
        match self {
            Self::None => Self::Assignment,
            Self::Assignment => Self::Or,
            Self::Or => Self::And,
            Self::And => Self::Equality,
            Self::Equality => Self::Comparison,
            Self::Comparison => Self::Term,
            Self::Term => Self::Factor,
            Self::Factor => Self::Unary,
            Self::Unary => Self::Call,
            Self::Call | Self::Primary => Self::Primary,
        }
    }

    /// The binding power each infix operator parses at. Grounded on the
    /// clox `ParseRule` table, expressed as a match over `TokenKind` instead
    /// of a table of function pointers — same dispatch, friendlier to the
    /// borrow checker when the handlers need `&mut self`.
    fn of_infix(kind: TokenKind) -> Self {
        use TokenKind::*;
        match kind {
            Or => Self::Or,
            And => Self::And,
            EqualEqual | BangEqual => Self::Equality,
            Less | LessEqual | Greater | GreaterEqual => Self::Comparison,
            Plus | Minus => Self::Term,
            Star | Slash => Self::Factor,
            OParen => Self::Call,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FunctionKind {
    Script,
    Function,
}

struct Local {
    name: Rc<str>,
    /// `None` between declaration and initialization, so a variable can't be
    /// read inside its own initializer (`var x = x;` resolves `x` as
    /// undefined rather than seeing the half-initialized slot).
    depth: Option<usize>,
}

struct FunctionState {
    kind: FunctionKind,
    name: Option<Rc<chunk::value::QString>>,
    arity: u8,
    chunk: Chunk,
    locals: Vec<Local>,
    scope_depth: usize,
}

impl FunctionState {
    fn new(kind: FunctionKind, name: Option<Rc<chunk::value::QString>>) -> Self {
        // Slot 0 is reserved for the callee itself, clox's convention for
        // `this`/recursive self-reference. This subset never reads it, but
        // keeping the slot keeps local indices aligned with argument order.
        let locals = vec![Local {
            name: Rc::from(""),
            depth: Some(0),
        }];
        Self {
            kind,
            name,
            arity: 0,
            chunk: Chunk::new(),
            locals,
            scope_depth: 0,
        }
    }
}

/// Single-pass Pratt parser that emits bytecode directly: there is no
/// intermediate AST, so parsing and code generation happen in the same
/// recursive-descent walk.
pub struct Compiler {
    scanner: Scanner,
    previous: Token,
    current: Token,
    errors: Vec<CompileError>,
    panic_mode: bool,
    interner: Interner,
    functions: Vec<FunctionState>,
}

impl Compiler {
    pub fn compile(source: &str) -> Result<Function, Vec<CompileError>> {
        let mut compiler = Self::new(source);
        compiler.advance();
        while !compiler.check(TokenKind::Eof) {
            compiler.declaration();
        }
        compiler.consume(TokenKind::Eof, |t| CompileError::UnexpectedToken(t));
        let script = compiler.end_function();
        if compiler.errors.is_empty() {
            if cfg!(feature = "verbose") {
                println!("{}", script.chunk);
            }
            Ok(script)
        } else {
            Err(compiler.errors)
        }
    }

    fn new(source: &str) -> Self {
        let scanner = Scanner::new(source.to_owned());
        // Never read before the first `advance()` call fills `current` with
        // the real first token; `previous` only matters once something has
        // been consumed into it.
        let placeholder = Token::new(TokenKind::Eof, Rc::from(""), 0, 0, 0);
        Self {
            scanner,
            previous: placeholder.clone(),
            current: placeholder,
            errors: Vec::new(),
            panic_mode: false,
            interner: Interner::new(),
            functions: vec![FunctionState::new(FunctionKind::Script, None)],
        }
    }

    // -- token stream -----------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current.clone();
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let tok = self.current.clone();
            self.report(CompileError::UnexpectedToken(tok));
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: TokenKind, err: impl FnOnce(Token) -> CompileError) {
        if self.check(kind) {
            self.advance();
        } else {
            let tok = self.current.clone();
            self.report(err(tok));
        }
    }

    fn consume_semicolon(&mut self) {
        self.consume(TokenKind::Semicolon, CompileError::UnexpectedToken);
    }

    fn report(&mut self, err: CompileError) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.errors.push(err);
    }

    /// Discards tokens until a likely statement boundary, so one error
    /// doesn't cascade into a wall of follow-on errors.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while !self.check(TokenKind::Eof) {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    // -- bytecode emission --------------------------------------------------

    fn chunk_mut(&mut self) -> &mut Chunk {
        &mut self.functions.last_mut().expect("always at least the script frame").chunk
    }

    fn current_chunk_len(&self) -> usize {
        self.functions.last().unwrap().chunk.len()
    }

    fn emit_instruction(&mut self, instr: Instruction) {
        let line = self.previous.line;
        self.emit_instruction_at(instr, line);
    }

    fn emit_instruction_at(&mut self, instr: Instruction, line: usize) {
        self.chunk_mut().write(instr, line);
    }

    fn emit_byte_operand(&mut self, instr: Instruction, operand: u8) {
        let line = self.previous.line;
        self.chunk_mut().write_with_byte_operand(instr, operand, line);
    }

    fn emit_constant(&mut self, value: Value) {
        let line = self.previous.line;
        if self
            .chunk_mut()
            .write_constant(Instruction::Constant, value, line)
            .is_err()
        {
            let tok = self.previous.clone();
            self.report(CompileError::TooManyConstants(tok));
        }
    }

    fn emit_jump(&mut self, instr: Instruction) -> usize {
        let line = self.previous.line;
        self.chunk_mut().write_jump(instr, line)
    }

    fn patch_jump(&mut self, offset: usize) {
        if self.chunk_mut().patch_jump(offset).is_err() {
            let tok = self.previous.clone();
            self.report(CompileError::JumpTooLarge(tok));
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        let line = self.previous.line;
        if self.chunk_mut().write_loop(loop_start, line).is_err() {
            let tok = self.previous.clone();
            self.report(CompileError::JumpTooLarge(tok));
        }
    }

    fn identifier_constant(&mut self, name: &Token) -> u8 {
        let interned = self.interner.intern(name.lexeme());
        match self.chunk_mut().add_constant(Value::from(interned)) {
            Ok(idx) => idx,
            Err(()) => {
                self.report(CompileError::TooManyConstants(name.clone()));
                0
            }
        }
    }

    // -- declarations and statements ----------------------------------------

    fn declaration(&mut self) {
        if self.matches(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable();
        // Marking the slot initialized before compiling the body lets the
        // function call itself recursively by name.
        self.mark_initialized();
        let name = self.previous.lexeme().to_owned();
        self.function(FunctionKind::Function, name);
        if let Some(idx) = global {
            self.emit_byte_operand(Instruction::DefineGlobal, idx);
        }
    }

    fn function(&mut self, kind: FunctionKind, name: String) {
        let qname = self.interner.intern(&name);
        self.functions.push(FunctionState::new(kind, Some(qname)));
        self.begin_scope();

        self.consume(TokenKind::OParen, CompileError::UnexpectedToken);
        if !self.check(TokenKind::CParen) {
            loop {
                if self.functions.last().unwrap().arity == u8::MAX {
                    let tok = self.current.clone();
                    self.report(CompileError::TooManyParameters(tok));
                } else {
                    self.functions.last_mut().unwrap().arity += 1;
                }
                self.parse_variable();
                self.mark_initialized();
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::CParen, CompileError::UnexpectedToken);
        self.consume(TokenKind::OBrace, CompileError::UnexpectedToken);
        self.block();

        let compiled = self.end_function();
        self.emit_constant(Value::from(compiled));
    }

    /// Appends the implicit `nil; return` every function body ends with and
    /// pops the function's frame, handing back the finished [`Function`].
    fn end_function(&mut self) -> Function {
        self.emit_instruction(Instruction::Nil);
        self.emit_instruction(Instruction::Return);
        let state = self.functions.pop().expect("function frame");
        Function::new(state.name, state.arity, state.chunk)
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable();
        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_instruction(Instruction::Nil);
        }
        self.consume_semicolon();
        match global {
            Some(idx) => self.emit_byte_operand(Instruction::DefineGlobal, idx),
            None => self.mark_initialized(),
        }
    }

    /// Consumes the name; for a global, returns its constant-pool index (the
    /// caller still owes a `DefineGlobal`). For a local, registers it in the
    /// current scope and returns `None` — the value already sitting on the
    /// stack *is* the local's slot, nothing else needs emitting.
    fn parse_variable(&mut self) -> Option<u8> {
        self.consume(TokenKind::Identifier, CompileError::UnexpectedToken);
        let name = self.previous.clone();
        if self.functions.last().unwrap().scope_depth > 0 {
            self.declare_local(name);
            None
        } else {
            Some(self.identifier_constant(&name))
        }
    }

    fn declare_local(&mut self, name: Token) {
        let depth = self.functions.last().unwrap().scope_depth;
        let duplicate = self
            .functions
            .last()
            .unwrap()
            .locals
            .iter()
            .rev()
            .take_while(|l| l.depth.map_or(true, |d| d >= depth))
            .any(|l| *l.name == *name.lexeme());
        if duplicate {
            self.report(CompileError::DuplicateVariable(name));
            return;
        }
        let state = self.functions.last_mut().unwrap();
        if state.locals.len() >= u8::MAX as usize + 1 {
            self.report(CompileError::TooManyLocals(name));
            return;
        }
        state.locals.push(Local {
            name: Rc::from(name.lexeme()),
            depth: None,
        });
    }

    fn mark_initialized(&mut self) {
        let state = self.functions.last_mut().unwrap();
        if state.scope_depth == 0 {
            return;
        }
        let depth = state.scope_depth;
        if let Some(local) = state.locals.last_mut() {
            local.depth = Some(depth);
        }
    }

    fn resolve_local(&self, name: &Token) -> Option<usize> {
        let state = self.functions.last().unwrap();
        state
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, l)| l.depth.is_some() && *l.name == *name.lexeme())
            .map(|(i, _)| i)
    }

    fn statement(&mut self) {
        if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::OBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume_semicolon();
        self.emit_instruction(Instruction::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume_semicolon();
        self.emit_instruction(Instruction::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::OParen, CompileError::UnexpectedToken);
        self.expression();
        self.consume(TokenKind::CParen, CompileError::UnexpectedToken);

        let then_jump = self.emit_jump(Instruction::JumpIfFalse);
        self.emit_instruction(Instruction::Pop);
        self.statement();

        let else_jump = self.emit_jump(Instruction::Jump);
        self.patch_jump(then_jump);
        self.emit_instruction(Instruction::Pop);

        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk_len();
        self.consume(TokenKind::OParen, CompileError::UnexpectedToken);
        self.expression();
        self.consume(TokenKind::CParen, CompileError::UnexpectedToken);

        let exit_jump = self.emit_jump(Instruction::JumpIfFalse);
        self.emit_instruction(Instruction::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_instruction(Instruction::Pop);
    }

    fn return_statement(&mut self) {
        let keyword = self.previous.clone();
        if self.functions.last().unwrap().kind == FunctionKind::Script {
            self.report(CompileError::ReturnAtTopLevel(keyword));
        }
        if self.matches(TokenKind::Semicolon) {
            self.emit_instruction(Instruction::Nil);
            self.emit_instruction(Instruction::Return);
        } else {
            self.expression();
            self.consume_semicolon();
            self.emit_instruction(Instruction::Return);
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::CBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::CBrace, CompileError::UnexpectedToken);
    }

    fn begin_scope(&mut self) {
        self.functions.last_mut().unwrap().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let mut pop_count = 0;
        {
            let state = self.functions.last_mut().unwrap();
            state.scope_depth -= 1;
            let depth = state.scope_depth;
            while let Some(local) = state.locals.last() {
                if local.depth.map_or(false, |d| d > depth) {
                    state.locals.pop();
                    pop_count += 1;
                } else {
                    break;
                }
            }
        }
        for _ in 0..pop_count {
            self.emit_instruction(Instruction::Pop);
        }
    }

    // -- expressions ----------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        if !self.prefix(self.previous.kind, can_assign) {
            let tok = self.previous.clone();
            self.report(CompileError::ExpectedExpression(tok));
            return;
        }
        while precedence <= Precedence::of_infix(self.current.kind) {
            self.advance();
            self.infix(self.previous.kind);
        }
        if can_assign && self.matches(TokenKind::Equal) {
            let tok = self.previous.clone();
            self.report(CompileError::InvalidAssignmentTarget(tok));
        }
    }

    fn prefix(&mut self, kind: TokenKind, can_assign: bool) -> bool {
        use TokenKind::*;
        match kind {
            OParen => {
                self.grouping();
                true
            }
            Minus | Bang => {
                self.unary();
                true
            }
            Number => {
                self.number();
                true
            }
            String => {
                self.string();
                true
            }
            True | False | Nil => {
                self.literal(kind);
                true
            }
            Identifier => {
                self.variable(can_assign);
                true
            }
            _ => false,
        }
    }

    fn infix(&mut self, kind: TokenKind) {
        use TokenKind::*;
        match kind {
            Plus | Minus | Star | Slash | EqualEqual | BangEqual | Less | LessEqual | Greater
            | GreaterEqual => self.binary(kind),
            And => self.and(),
            Or => self.or(),
            OParen => self.call(),
            _ => unreachable!("infix() only called for tokens with a binding power"),
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::CParen, CompileError::UnexpectedToken);
    }

    fn unary(&mut self) {
        let op = self.previous.kind;
        let line = self.previous.line;
        self.parse_precedence(Precedence::Unary);
        match op {
            TokenKind::Minus => self.emit_instruction_at(Instruction::Negate, line),
            TokenKind::Bang => self.emit_instruction_at(Instruction::Not, line),
            _ => unreachable!(),
        }
    }

    fn binary(&mut self, op: TokenKind) {
        let line = self.previous.line;
        self.parse_precedence(Precedence::of_infix(op).next());
        match op {
            TokenKind::Plus => self.emit_instruction_at(Instruction::Add, line),
            TokenKind::Minus => self.emit_instruction_at(Instruction::Subtract, line),
            TokenKind::Star => self.emit_instruction_at(Instruction::Multiply, line),
            TokenKind::Slash => self.emit_instruction_at(Instruction::Divide, line),
            TokenKind::EqualEqual => self.emit_instruction_at(Instruction::Equal, line),
            TokenKind::BangEqual => {
                self.emit_instruction_at(Instruction::Equal, line);
                self.emit_instruction_at(Instruction::Not, line);
            }
            TokenKind::Greater => self.emit_instruction_at(Instruction::Greater, line),
            TokenKind::GreaterEqual => {
                self.emit_instruction_at(Instruction::Less, line);
                self.emit_instruction_at(Instruction::Not, line);
            }
            TokenKind::Less => self.emit_instruction_at(Instruction::Less, line),
            TokenKind::LessEqual => {
                self.emit_instruction_at(Instruction::Greater, line);
                self.emit_instruction_at(Instruction::Not, line);
            }
            _ => unreachable!(),
        }
    }

    /// `and`'s right side only runs if the left side is truthy: jump past it
    /// (leaving the falsy left value as the result) otherwise.
    fn and(&mut self) {
        let end_jump = self.emit_jump(Instruction::JumpIfFalse);
        self.emit_instruction(Instruction::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    /// `or`'s right side only runs if the left side is falsy.
    fn or(&mut self) {
        let else_jump = self.emit_jump(Instruction::JumpIfFalse);
        let end_jump = self.emit_jump(Instruction::Jump);
        self.patch_jump(else_jump);
        self.emit_instruction(Instruction::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self) {
        let arg_count = self.argument_list();
        self.emit_byte_operand(Instruction::Call, arg_count);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u8 = 0;
        if !self.check(TokenKind::CParen) {
            loop {
                self.expression();
                if count == u8::MAX {
                    let tok = self.previous.clone();
                    self.report(CompileError::TooManyArguments(tok));
                } else {
                    count += 1;
                }
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::CParen, CompileError::UnexpectedToken);
        count
    }

    fn number(&mut self) {
        let value: f64 = self
            .previous
            .lexeme()
            .parse()
            .expect("scanner only produces well-formed numeric lexemes");
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self) {
        let lexeme = self.previous.lexeme();
        let text = &lexeme[1..lexeme.len() - 1];
        let interned = self.interner.intern(text);
        self.emit_constant(Value::from(interned));
    }

    fn literal(&mut self, kind: TokenKind) {
        match kind {
            TokenKind::True => self.emit_instruction(Instruction::True),
            TokenKind::False => self.emit_instruction(Instruction::False),
            TokenKind::Nil => self.emit_instruction(Instruction::Nil),
            _ => unreachable!(),
        }
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.clone();
        self.named_variable(&name, can_assign);
    }

    fn named_variable(&mut self, name: &Token, can_assign: bool) {
        let (get_op, set_op, index) = match self.resolve_local(name) {
            Some(slot) => (Instruction::GetLocal, Instruction::SetLocal, slot as u8),
            None => {
                let idx = self.identifier_constant(name);
                (Instruction::GetGlobal, Instruction::SetGlobal, idx)
            }
        };
        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_byte_operand(set_op, index);
        } else {
            self.emit_byte_operand(get_op, index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunk::Instruction::*;

    fn ops(source: &str) -> Vec<Instruction> {
        let function = Compiler::compile(source).expect("should compile");
        let mut out = vec![];
        let mut offset = 0;
        while offset < function.chunk.len() {
            let instr = function.chunk.instruction_at(offset);
            offset += 1 + instr.operand_len();
            out.push(instr);
        }
        out
    }

    #[test]
    fn empty_program_ends_with_nil_return() {
        assert_eq!(ops(""), vec![Nil, Return]);
    }

    #[test]
    fn print_expression_statement() {
        assert_eq!(ops("print 1 + 2;"), vec![Constant, Constant, Add, Print, Nil, Return]);
    }

    #[test]
    fn global_var_round_trips() {
        assert_eq!(
            ops("var x = 1; x;"),
            vec![Constant, DefineGlobal, GetGlobal, Pop, Nil, Return]
        );
    }

    #[test]
    fn block_scoped_local_pops_on_exit() {
        assert_eq!(
            ops("{ var x = 1; }"),
            vec![Constant, Pop, Nil, Return]
        );
    }

    #[test]
    fn if_without_else_has_two_patched_jumps() {
        let function = Compiler::compile("if (true) print 1;").unwrap();
        let mut offset = 0;
        let mut saw_jump_if_false = false;
        while offset < function.chunk.len() {
            let instr = function.chunk.instruction_at(offset);
            if instr == JumpIfFalse {
                saw_jump_if_false = true;
            }
            offset += 1 + instr.operand_len();
        }
        assert!(saw_jump_if_false);
    }

    #[test]
    fn undefined_variable_assignment_is_accepted_at_compile_time() {
        // Assigning to a name with no matching declaration compiles to a
        // SetGlobal; whether the global exists is a *runtime* question.
        assert!(Compiler::compile("x = 1;").is_ok());
    }

    #[test]
    fn return_at_top_level_is_a_compile_error() {
        let errors = Compiler::compile("return 1;").unwrap_err();
        assert!(matches!(errors[0], CompileError::ReturnAtTopLevel(_)));
    }

    #[test]
    fn duplicate_local_in_same_scope_is_a_compile_error() {
        let errors = Compiler::compile("{ var x = 1; var x = 2; }").unwrap_err();
        assert!(matches!(errors[0], CompileError::DuplicateVariable(_)));
    }

    #[test]
    fn function_call_emits_call_with_arg_count() {
        assert_eq!(
            ops("fun f() {} f();"),
            vec![Constant, DefineGlobal, GetGlobal, Call, Pop, Nil, Return]
        );
    }

    #[test]
    fn chunk_with_257_constants_is_rejected() {
        let mut source = String::new();
        for i in 0..257 {
            source.push_str(&format!("print {i};\n"));
        }
        let errors = Compiler::compile(&source).unwrap_err();
        assert!(matches!(errors[0], CompileError::TooManyConstants(_)));
    }
}
