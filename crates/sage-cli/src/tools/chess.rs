//! Chess positions from FEN: description, move validation and a
//! one-ply material search

use async_trait::async_trait;
use sage_agent::tool::{Tool, ToolError, ToolOutput, str_arg};
use serde_json::{Value, json};
use shakmaty::fen::Fen;
use shakmaty::san::{San, SanPlus};
use shakmaty::uci::UciMove;
use shakmaty::{
    Board, CastlingMode, CastlingSide, Chess, Color, EnPassantMode, File, Move, Position, Rank,
    Role, Square,
};
use tokio_util::sync::CancellationToken;

fn color_name(color: Color) -> &'static str {
    match color {
        Color::White => "White",
        Color::Black => "Black",
    }
}

fn parse_position(fen: &str) -> Result<Chess, ToolError> {
    let setup: Fen = fen
        .trim()
        .parse()
        .map_err(|e| ToolError::execution(format!("Invalid FEN '{}': {}", fen, e)))?;
    setup
        .into_position(CastlingMode::Standard)
        .map_err(|e| ToolError::execution(format!("Invalid position '{}': {}", fen, e)))
}

/// Rank 8 first, `.` for empty squares
fn diagram(board: &Board) -> String {
    Rank::ALL
        .iter()
        .rev()
        .map(|&rank| {
            File::ALL
                .iter()
                .map(|&file| {
                    board
                        .piece_at(Square::from_coords(file, rank))
                        .map_or('.', |piece| piece.char())
                        .to_string()
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn piece_value(role: Role) -> i32 {
    match role {
        Role::Pawn => 1,
        Role::Knight | Role::Bishop => 3,
        Role::Rook => 5,
        Role::Queen => 9,
        Role::King => 0,
    }
}

fn material(board: &Board, color: Color) -> i32 {
    Square::ALL
        .iter()
        .filter_map(|&sq| board.piece_at(sq))
        .filter(|piece| piece.color == color)
        .map(|piece| piece_value(piece.role))
        .sum()
}

/// White material minus Black material
fn evaluate(pos: &Chess) -> i32 {
    material(pos.board(), Color::White) - material(pos.board(), Color::Black)
}

fn fen_of(pos: &Chess) -> String {
    Fen::from_position(pos.clone(), EnPassantMode::Legal).to_string()
}

fn describe(fen: &str) -> Result<String, ToolError> {
    let pos = parse_position(fen)?;

    let mut lines = vec![
        format!("FEN: {}", fen),
        "\nPosition:".to_string(),
        diagram(pos.board()),
        format!("\nTurn: {}", color_name(pos.turn())),
        format!("Move number: {}", pos.fullmoves()),
    ];

    let castling: Vec<&str> = [
        (Color::White, CastlingSide::KingSide, "White O-O"),
        (Color::White, CastlingSide::QueenSide, "White O-O-O"),
        (Color::Black, CastlingSide::KingSide, "Black O-O"),
        (Color::Black, CastlingSide::QueenSide, "Black O-O-O"),
    ]
    .iter()
    .filter(|(color, side, _)| pos.castles().has(*color, *side))
    .map(|(_, _, label)| *label)
    .collect();
    if castling.is_empty() {
        lines.push("Castling rights: None".to_string());
    } else {
        lines.push(format!("Castling rights: {}", castling.join(", ")));
    }

    if pos.is_check() {
        lines.push("Status: IN CHECK".to_string());
    }

    lines.push(format!(
        "\nMaterial: White {} - Black {}",
        material(pos.board(), Color::White),
        material(pos.board(), Color::Black)
    ));
    lines.push(format!("Legal moves: {}", pos.legal_moves().len()));
    Ok(lines.join("\n"))
}

enum MoveCheck {
    Legal(Move),
    Illegal,
    Unreadable,
}

/// SAN first, then UCI
fn resolve_move(pos: &Chess, text: &str) -> MoveCheck {
    let san: Option<San> = text.parse::<SanPlus>().ok().map(|plus| plus.san);
    if let Some(m) = san.as_ref().and_then(|s| s.to_move(pos).ok()) {
        return MoveCheck::Legal(m);
    }
    match text.parse::<UciMove>() {
        Ok(uci) => match uci.to_move(pos) {
            Ok(m) => MoveCheck::Legal(m),
            Err(_) => MoveCheck::Illegal,
        },
        // Well-formed SAN that names no legal move
        Err(_) if san.is_some() => MoveCheck::Illegal,
        Err(_) => MoveCheck::Unreadable,
    }
}

fn validate(fen: &str, text: &str) -> Result<String, ToolError> {
    let mut pos = parse_position(fen)?;
    let m = match resolve_move(&pos, text.trim()) {
        MoveCheck::Legal(m) => m,
        MoveCheck::Illegal => return Ok(format!("Move '{}' is ILLEGAL in this position", text)),
        MoveCheck::Unreadable => {
            return Err(ToolError::execution(format!(
                "Could not parse move '{}'. Use UCI (e2e4) or SAN (Nf3) format.",
                text
            )));
        }
    };

    pos.play_unchecked(&m);
    let mut lines = vec![
        format!("Move '{}' is LEGAL", text),
        "\nResulting position:".to_string(),
        diagram(pos.board()),
        format!("\nNew FEN: {}", fen_of(&pos)),
    ];
    if pos.is_check() {
        lines.push("This move gives CHECK".to_string());
    }
    if pos.is_checkmate() {
        lines.push("This move is CHECKMATE!".to_string());
    }
    Ok(lines.join("\n"))
}

/// Best move by material after one ply for the side to move
fn analyze(fen: &str) -> Result<String, ToolError> {
    let pos = parse_position(fen)?;
    let turn = pos.turn();

    if pos.is_checkmate() {
        return Ok(format!(
            "Game Over: Checkmate! {} wins.",
            color_name(turn.other())
        ));
    }
    if pos.is_stalemate() {
        return Ok("Game Over: Stalemate (Draw)".to_string());
    }
    if pos.is_insufficient_material() {
        return Ok("Game Over: Draw by insufficient material".to_string());
    }

    let moves = pos.legal_moves();
    let mut best: Option<(Move, i32, Chess)> = None;
    for m in &moves {
        let mut after = pos.clone();
        after.play_unchecked(m);
        let score = evaluate(&after);
        let better = match &best {
            None => true,
            Some((_, best_score, _)) => match turn {
                Color::White => score > *best_score,
                Color::Black => score < *best_score,
            },
        };
        if better {
            best = Some((m.clone(), score, after));
        }
    }
    let Some((best_move, best_score, after)) = best else {
        return Ok("No legal moves available".to_string());
    };

    let mut lines = vec![
        format!("Position: {}", fen),
        format!("Turn: {}", color_name(turn)),
        format!("\nPosition evaluation: {:.2}", evaluate(&pos) as f64),
        "(Positive favors White, Negative favors Black)".to_string(),
        format!(
            "\nBest move: {} ({})",
            best_move.to_uci(CastlingMode::Standard),
            San::from_move(&pos, &best_move)
        ),
        format!("Expected evaluation after move: {:.2}", best_score as f64),
    ];
    if after.is_check() {
        lines.push("This move gives check!".to_string());
    }
    lines.push(format!("\nTotal legal moves: {}", moves.len()));
    Ok(lines.join("\n"))
}

fn fen_property() -> Value {
    json!({ "type": "string", "description": "Position in FEN notation" })
}

pub struct ChessPositionTool;

#[async_trait]
impl Tool for ChessPositionTool {
    fn name(&self) -> &str {
        "get_chess_position_info"
    }

    fn description(&self) -> &str {
        "Describe a chess position given in FEN: board, side to move, castling rights, \
         check status, material balance and number of legal moves."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "fen": fen_property() },
            "required": ["fen"]
        })
    }

    async fn execute(&self, arguments: Value, _cancel: CancellationToken) -> ToolOutput {
        describe(str_arg(&arguments, "fen")?)
    }
}

pub struct ValidateChessMoveTool;

#[async_trait]
impl Tool for ValidateChessMoveTool {
    fn name(&self) -> &str {
        "validate_chess_move"
    }

    fn description(&self) -> &str {
        "Check whether a move is legal in a FEN position and show the resulting position."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "fen": fen_property(),
                "move": {
                    "type": "string",
                    "description": "Move in SAN (Nf3) or UCI (e2e4) notation"
                }
            },
            "required": ["fen", "move"]
        })
    }

    async fn execute(&self, arguments: Value, _cancel: CancellationToken) -> ToolOutput {
        validate(str_arg(&arguments, "fen")?, str_arg(&arguments, "move")?)
    }
}

pub struct AnalyzeChessTool;

#[async_trait]
impl Tool for AnalyzeChessTool {
    fn name(&self) -> &str {
        "analyze_chess_fen"
    }

    fn description(&self) -> &str {
        "Suggest a move for the side to move by comparing material after each legal move. \
         Reports the evaluation (positive favors White) and detects finished games."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "fen": fen_property() },
            "required": ["fen"]
        })
    }

    async fn execute(&self, arguments: Value, _cancel: CancellationToken) -> ToolOutput {
        analyze(str_arg(&arguments, "fen")?)
    }
}
