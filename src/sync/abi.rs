//! Mirror store and registry bindings on the execution ledger.

use alloy::sol;

sol! {
    #[allow(missing_docs)]
    interface IStoreRegistry {
        function getAddress(bytes32 key) external view returns (address);
    }

    #[allow(missing_docs)]
    interface IPoolStore {
        function updatePool(
            uint256 chainId,
            address pool,
            uint256 sqrtPriceX96,
            int32 tick,
            uint128 liquidity,
            uint256 feeGrowthGlobal0X128,
            uint256 feeGrowthGlobal1X128
        ) external;

        /// `updatedAt == 0` means the pool was never written.
        function getPool(uint256 chainId, address pool) external view returns (
            uint256 sqrtPriceX96,
            int32 tick,
            uint128 liquidity,
            uint256 feeGrowthGlobal0X128,
            uint256 feeGrowthGlobal1X128,
            uint256 updatedAt
        );
    }

    #[allow(missing_docs)]
    interface IPositionStore {
        function updatePosition(
            uint256 chainId,
            uint256 positionId,
            address owner,
            address pool,
            int32 tickLower,
            int32 tickUpper,
            uint128 liquidity,
            uint128 tokensOwed0,
            uint128 tokensOwed1
        ) external;

        function getPosition(uint256 chainId, uint256 positionId) external view returns (
            address owner,
            address pool,
            int32 tickLower,
            int32 tickUpper,
            uint128 liquidity,
            uint128 tokensOwed0,
            uint128 tokensOwed1,
            uint256 updatedAt
        );
    }

    #[allow(missing_docs)]
    interface IBalanceStore {
        function updateBalance(uint256 chainId, address holder, address token, uint256 balance) external;

        function getBalance(uint256 chainId, address holder, address token) external view returns (
            uint256 balance,
            uint256 updatedAt
        );
    }
}
