//! External-chain and strategy callback bindings.

use alloy::primitives::Selector;
use alloy::sol;
use alloy::sol_types::SolCall;

sol! {
    #[allow(missing_docs)]
    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
        function approve(address spender, uint256 amount) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
    }

    #[allow(missing_docs)]
    interface INonfungiblePositionManager {
        struct IncreaseLiquidityParams {
            uint256 tokenId;
            uint256 amount0Desired;
            uint256 amount1Desired;
            uint256 amount0Min;
            uint256 amount1Min;
            uint256 deadline;
        }

        struct DecreaseLiquidityParams {
            uint256 tokenId;
            uint128 liquidity;
            uint256 amount0Min;
            uint256 amount1Min;
            uint256 deadline;
        }

        struct CollectParams {
            uint256 tokenId;
            address recipient;
            uint128 amount0Max;
            uint128 amount1Max;
        }

        function increaseLiquidity(IncreaseLiquidityParams calldata params)
            external payable returns (uint128 liquidity, uint256 amount0, uint256 amount1);

        function decreaseLiquidity(DecreaseLiquidityParams calldata params)
            external payable returns (uint256 amount0, uint256 amount1);

        function collect(CollectParams calldata params)
            external payable returns (uint256 amount0, uint256 amount1);
    }

    /// Entry points the system account calls on a deployed strategy.
    #[allow(missing_docs)]
    interface IStrategyCallbacks {
        function onExternalEvent(uint8 kind, bytes32 subscriptionHash, bytes payload) external;
        function submitEffectResult(bytes32 effectId, bool success, bytes32 txHash, string errorMessage, bytes resultData) external;
        function onFundingResult(uint256 requestId, bool success, bytes32 txHash, string errorMessage) external;
    }
}

pub fn selector_of<C: SolCall>() -> Selector {
    Selector::from(C::SELECTOR)
}
